mod common;
mod http_helpers;

use axum::http::StatusCode;
use common::{read_json, test_app, test_state};
use http_helpers::{empty_request, json_request};
use serde_json::json;
use tower::ServiceExt;

async fn create_domain(app: &common::TestApp, owner: &str) -> String {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/domains",
            owner,
            json!({ "name": "plant-floor" }),
        ))
        .await
        .expect("domain");
    assert_eq!(response.status(), StatusCode::CREATED);
    read_json(response).await["id"]
        .as_str()
        .expect("domain id")
        .to_string()
}

#[tokio::test]
async fn requests_without_subject_are_rejected() {
    let app = test_app(test_state());
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/domains")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(json!({ "name": "x" }).to_string()))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = read_json(response).await;
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn system_endpoints_report_backends() {
    let app = test_app(test_state());
    let response = app
        .clone()
        .oneshot(empty_request("GET", "/v1/system/health", "anyone"))
        .await
        .expect("health");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "ok");

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/v1/system/info", "anyone"))
        .await
        .expect("info");
    let body = read_json(response).await;
    assert_eq!(body["storage_backend"], "memory");
    assert_eq!(body["cache_backend"], "memory");
    assert_eq!(body["durable_storage"], false);

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/v1/openapi.json", "anyone"))
        .await
        .expect("openapi");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert!(body["paths"]["/v1/domains/{domain_id}/groups"].is_object());
}

#[tokio::test]
async fn group_hierarchy_and_membership_flow() {
    let app = test_app(test_state());
    let domain = create_domain(&app, "alice").await;
    let groups = format!("/v1/domains/{domain}/groups");

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &groups,
            "alice",
            json!({ "id": "acme", "name": "Acme", "type": "org" }),
        ))
        .await
        .expect("root");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &groups,
            "alice",
            json!({ "id": "plant", "parent_id": "acme", "name": "Plant", "metadata": { "site": "north" } }),
        ))
        .await
        .expect("child");
    assert_eq!(response.status(), StatusCode::CREATED);
    let child = read_json(response).await;
    assert_eq!(child["path"], "acme.plant");
    assert_eq!(child["level"], 1);
    assert_eq!(child["type"], "org");

    let response = app
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("{groups}/acme/children?level=1"),
            "alice",
        ))
        .await
        .expect("children");
    assert_eq!(response.status(), StatusCode::OK);
    let items = read_json(response).await["items"].clone();
    assert_eq!(items.as_array().map(Vec::len), Some(1));
    assert_eq!(items[0]["id"], "plant");

    let response = app
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("{groups}/plant/parents?level=5"),
            "alice",
        ))
        .await
        .expect("parents");
    let items = read_json(response).await["items"].clone();
    assert_eq!(items[0]["id"], "acme");

    let response = app
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("{groups}?metadata=not-json"),
            "alice",
        ))
        .await
        .expect("bad filter");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("{groups}/plant/members"),
            "alice",
            json!({ "member_id": "sensor_7" }),
        ))
        .await
        .expect("assign");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("{groups}/plant/members"),
            "alice",
            json!({ "member_id": "sensor_7" }),
        ))
        .await
        .expect("assign twice");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(empty_request(
            "DELETE",
            &format!("{groups}/acme"),
            "alice",
        ))
        .await
        .expect("delete busy");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(read_json(response).await["code"], "group_not_empty");

    let response = app
        .clone()
        .oneshot(empty_request(
            "DELETE",
            &format!("{groups}/plant/members/sensor_7"),
            "alice",
        ))
        .await
        .expect("unassign");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(empty_request(
            "DELETE",
            &format!("{groups}/acme"),
            "alice",
        ))
        .await
        .expect("delete");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("{groups}/plant"),
            "alice",
        ))
        .await
        .expect("gone");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn outsiders_need_a_grant() {
    let app = test_app(test_state());
    let domain = create_domain(&app, "alice").await;
    let groups = format!("/v1/domains/{domain}/groups");
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &groups,
            "alice",
            json!({ "id": "ops", "name": "Ops", "type": "site" }),
        ))
        .await
        .expect("group");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(empty_request("GET", &format!("{groups}/ops"), "bob"))
        .await
        .expect("denied");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let evaluate = format!("/v1/domains/{domain}/policies/evaluate");
    let question = json!({ "subject": "bob", "object": "ops", "actions": ["read"] });
    let response = app
        .clone()
        .oneshot(json_request("POST", &evaluate, "alice", question.clone()))
        .await
        .expect("evaluate");
    assert_eq!(read_json(response).await["allowed"], false);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/domains/{domain}/policies"),
            "bob",
            question.clone(),
        ))
        .await
        .expect("self grant");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/domains/{domain}/policies"),
            "alice",
            question.clone(),
        ))
        .await
        .expect("grant");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(json_request("POST", &evaluate, "alice", question))
        .await
        .expect("evaluate");
    assert_eq!(read_json(response).await["allowed"], true);

    let response = app
        .clone()
        .oneshot(empty_request("GET", &format!("{groups}/ops"), "bob"))
        .await
        .expect("granted");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(empty_request(
            "DELETE",
            &format!("/v1/domains/{domain}/policies/bob/ops"),
            "alice",
        ))
        .await
        .expect("revoke");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(empty_request("GET", &format!("{groups}/ops"), "bob"))
        .await
        .expect("revoked");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn roles_flow_over_http() {
    let app = test_app(test_state());
    let domain = create_domain(&app, "alice").await;
    let roles = format!("/v1/domains/{domain}/entities/{domain}/roles");

    let response = app
        .clone()
        .oneshot(empty_request("GET", &roles, "alice"))
        .await
        .expect("list");
    assert_eq!(response.status(), StatusCode::OK);
    let page = read_json(response).await;
    let names: Vec<&str> = page["roles"]
        .as_array()
        .expect("roles")
        .iter()
        .filter_map(|role| role["name"].as_str())
        .collect();
    assert!(names.contains(&"admin"));

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &roles,
            "alice",
            json!({ "name": "viewer", "actions": ["read"], "members": ["carol"] }),
        ))
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(empty_request("GET", &format!("/v1/domains/{domain}"), "carol"))
        .await
        .expect("viewer reads");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("{roles}/viewer/actions"),
            "alice",
            json!({ "actions": ["publish"] }),
        ))
        .await
        .expect("wrong kind");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("{roles}/viewer/members/check"),
            "alice",
            json!({ "members": ["carol"] }),
        ))
        .await
        .expect("check");
    assert_eq!(read_json(response).await["exists"], true);

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", &format!("{roles}/admin"), "alice"))
        .await
        .expect("builtin");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request(
            "DELETE",
            &format!("{roles}/admin/members"),
            "alice",
            json!({ "members": ["alice"] }),
        ))
        .await
        .expect("last admin");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/v1/actions/channel", "alice"))
        .await
        .expect("catalogue");
    let actions = read_json(response).await["actions"].clone();
    assert!(
        actions
            .as_array()
            .expect("actions")
            .iter()
            .any(|action| action == "publish")
    );
}

#[tokio::test]
async fn registry_connections_and_events() {
    let app = test_app(test_state());
    let domain = create_domain(&app, "alice").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/domains/{domain}/things"),
            "alice",
            json!({ "name": "meter", "key": "meter-key" }),
        ))
        .await
        .expect("thing");
    assert_eq!(response.status(), StatusCode::CREATED);
    let thing = read_json(response).await;
    let thing_id = thing["id"].as_str().expect("thing id").to_string();
    assert_eq!(thing["key"], "meter-key");

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/domains/{domain}/things"),
            "alice",
            json!({ "name": "clone", "key": "meter-key" }),
        ))
        .await
        .expect("duplicate key");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/domains/{domain}/channels"),
            "alice",
            json!({ "name": "telemetry" }),
        ))
        .await
        .expect("channel");
    assert_eq!(response.status(), StatusCode::CREATED);
    let channel_id = read_json(response).await["id"]
        .as_str()
        .expect("channel id")
        .to_string();

    let connections = json!({
        "connections": [{ "thing_id": thing_id, "channel_id": channel_id }]
    });
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/domains/{domain}/connections"),
            "mallory",
            connections.clone(),
        ))
        .await
        .expect("outsider connect");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/domains/{domain}/connections"),
            "alice",
            connections.clone(),
        ))
        .await
        .expect("connect");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        read_json(response).await["items"][0]["domain_id"],
        domain.as_str()
    );

    let response = app
        .clone()
        .oneshot(json_request(
            "DELETE",
            &format!("/v1/domains/{domain}/connections"),
            "alice",
            connections,
        ))
        .await
        .expect("disconnect");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(empty_request(
            "POST",
            &format!("/v1/domains/{domain}/channels/{channel_id}/disable"),
            "alice",
        ))
        .await
        .expect("disable channel");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "disabled");

    let response = app
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("/v1/domains/{domain}/events/changes?since=0"),
            "alice",
        ))
        .await
        .expect("changes");
    assert_eq!(response.status(), StatusCode::OK);
    let page = read_json(response).await;
    let operations: Vec<&str> = page["items"]
        .as_array()
        .expect("items")
        .iter()
        .filter_map(|event| event["operation"].as_str())
        .collect();
    assert_eq!(
        operations,
        vec![
            "domain_create",
            "thing_create",
            "channel_create",
            "connections_add",
            "connections_remove",
            "channel_disable"
        ]
    );

    let response = app
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("/v1/domains/{domain}/events/changes"),
            "mallory",
        ))
        .await
        .expect("outsider changes");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
