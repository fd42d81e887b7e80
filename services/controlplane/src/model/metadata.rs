//! Free-form metadata attached to groups and the containment filter used to
//! query it.
//!
//! Containment follows Postgres `jsonb @>` semantics so both store backends
//! answer metadata filters identically: objects match when every key of the
//! filter is present and contained, arrays match when every filter element is
//! contained in some element, and scalars match on equality.
use serde_json::{Map, Value};

pub type Metadata = Map<String, Value>;

/// Serialized size limit for a metadata document.
pub const METADATA_MAX_BYTES: usize = 32 * 1024;

pub fn json_contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Object(hay), Value::Object(need)) => need.iter().all(|(key, value)| {
            hay.get(key)
                .map(|candidate| json_contains(candidate, value))
                .unwrap_or(false)
        }),
        (Value::Array(hay), Value::Array(need)) => need
            .iter()
            .all(|value| hay.iter().any(|candidate| json_contains(candidate, value))),
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (a, b) => a == b,
    }
}

/// An absent or empty filter matches everything.
pub fn metadata_matches(metadata: &Metadata, filter: Option<&Metadata>) -> bool {
    match filter {
        None => true,
        Some(filter) => filter.iter().all(|(key, value)| {
            metadata
                .get(key)
                .map(|candidate| json_contains(candidate, value))
                .unwrap_or(false)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> Metadata {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn nested_objects_match_by_containment() {
        let stored = meta(json!({"site": {"city": "Oslo", "floor": 3}, "tier": "gold"}));
        assert!(metadata_matches(&stored, Some(&meta(json!({"site": {"city": "Oslo"}})))));
        assert!(metadata_matches(&stored, Some(&meta(json!({"tier": "gold"})))));
        assert!(!metadata_matches(&stored, Some(&meta(json!({"tier": "silver"})))));
        assert!(!metadata_matches(&stored, Some(&meta(json!({"missing": 1})))));
    }

    #[test]
    fn arrays_match_when_every_element_is_present() {
        let stored = meta(json!({"tags": ["a", "b", "c"]}));
        assert!(metadata_matches(&stored, Some(&meta(json!({"tags": ["c", "a"]})))));
        assert!(!metadata_matches(&stored, Some(&meta(json!({"tags": ["d"]})))));
    }

    #[test]
    fn numbers_compare_numerically() {
        assert!(json_contains(&json!(1), &json!(1.0)));
        assert!(!json_contains(&json!(1), &json!(2)));
    }

    #[test]
    fn empty_or_absent_filter_matches_everything() {
        let stored = meta(json!({"k": "v"}));
        assert!(metadata_matches(&stored, None));
        assert!(metadata_matches(&stored, Some(&Metadata::new())));
    }
}
