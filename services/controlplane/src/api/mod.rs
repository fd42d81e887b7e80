//! Control-plane HTTP API module.
//!
//! # Purpose
//! Exposes route handler modules and the helpers they share for resolving the
//! caller and decoding filters.
//!
//! # Security considerations
//! The caller's identity arrives in the [`SUBJECT_HEADER`] header, set by the
//! authenticating proxy in front of this service. Requests without it are
//! rejected before any service call.
pub mod domains;
pub mod entities;
pub mod error;
pub mod events;
pub mod groups;
pub mod openapi;
pub mod policies;
pub mod roles;
pub mod system;
pub mod types;

use crate::api::error::{ApiError, api_unauthorized, api_validation_error};
use crate::model::{HierarchyQuery, Metadata};
use crate::service::Session;
use axum::http::HeaderMap;

/// Header carrying the authenticated subject id.
pub const SUBJECT_HEADER: &str = "x-arbiter-subject";

/// Level used by hierarchy listings that do not name one.
pub const DEFAULT_HIERARCHY_LEVEL: u64 = 5;

pub(crate) fn subject_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(SUBJECT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| api_unauthorized("missing subject"))
}

pub(crate) fn session_from_headers(
    headers: &HeaderMap,
    domain_id: &str,
) -> Result<Session, ApiError> {
    Ok(Session::new(subject_from_headers(headers)?, domain_id))
}

/// Decodes a JSON-object metadata filter from a query parameter.
pub(crate) fn parse_metadata(raw: Option<&str>) -> Result<Option<Metadata>, ApiError> {
    let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
        return Ok(None);
    };
    serde_json::from_str::<Metadata>(raw)
        .map(Some)
        .map_err(|_| api_validation_error("metadata must be a JSON object"))
}

pub(crate) fn hierarchy_query(
    level: Option<u64>,
    metadata: Option<&str>,
) -> Result<HierarchyQuery, ApiError> {
    let query = HierarchyQuery::new(level.unwrap_or(DEFAULT_HIERARCHY_LEVEL));
    Ok(match parse_metadata(metadata)? {
        Some(metadata) => query.with_metadata(metadata),
        None => query,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn missing_or_blank_subject_is_unauthorized() {
        let headers = HeaderMap::new();
        let err = subject_from_headers(&headers).expect_err("missing");
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let mut headers = HeaderMap::new();
        headers.insert(SUBJECT_HEADER, "  ".parse().expect("header"));
        assert!(subject_from_headers(&headers).is_err());
    }

    #[test]
    fn session_carries_subject_and_domain() {
        let mut headers = HeaderMap::new();
        headers.insert(SUBJECT_HEADER, "alice".parse().expect("header"));
        let session = session_from_headers(&headers, "d1").expect("session");
        assert_eq!(session, Session::new("alice", "d1"));
    }

    #[test]
    fn metadata_filters_must_be_objects() {
        assert_eq!(parse_metadata(None).expect("none"), None);
        assert_eq!(parse_metadata(Some("")).expect("blank"), None);
        let parsed = parse_metadata(Some(r#"{"site":"north"}"#))
            .expect("object")
            .expect("some");
        assert_eq!(parsed["site"], "north");
        let err = parse_metadata(Some("[1,2]")).expect_err("array");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn hierarchy_query_defaults_level() {
        let query = hierarchy_query(None, None).expect("query");
        assert_eq!(query.level, DEFAULT_HIERARCHY_LEVEL);
        assert!(query.metadata.is_none());
        let query = hierarchy_query(Some(2), Some(r#"{"a":1}"#)).expect("query");
        assert_eq!(query.level, 2);
        assert!(query.metadata.is_some());
    }
}
