#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use controlplane::api::SUBJECT_HEADER;

pub fn json_request(
    method: &str,
    uri: &str,
    subject: &str,
    body: serde_json::Value,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header(SUBJECT_HEADER, subject)
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn empty_request(method: &str, uri: &str, subject: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(SUBJECT_HEADER, subject)
        .body(Body::empty())
        .expect("request")
}
