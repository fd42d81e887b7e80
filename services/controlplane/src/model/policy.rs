use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;

/// Direct grant of `actions` on `object` to `subject`.
///
/// At most one policy exists per (subject, object) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Policy {
    pub subject: String,
    pub object: String,
    #[schema(value_type = Vec<String>)]
    pub actions: BTreeSet<String>,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub domain_id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Policy {
    /// A policy used only as an access question, never persisted.
    pub fn request<I, S>(subject: &str, object: &str, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subject: subject.to_string(),
            object: object.to_string(),
            actions: actions.into_iter().map(Into::into).collect(),
            owner_id: String::new(),
            domain_id: String::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyFilter {
    pub subject: Option<String>,
    pub object: Option<String>,
    /// Keeps policies carrying this action.
    pub action: Option<String>,
    pub domain_id: Option<String>,
}

impl PolicyFilter {
    pub fn matches(&self, policy: &Policy) -> bool {
        self.subject.as_ref().is_none_or(|s| *s == policy.subject)
            && self.object.as_ref().is_none_or(|o| *o == policy.object)
            && self.action.as_ref().is_none_or(|a| policy.actions.contains(a))
            && self.domain_id.as_ref().is_none_or(|d| *d == policy.domain_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PolicyPage {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub policies: Vec<Policy>,
}
