use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;

/// Named bundle of actions on one entity, granted to its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub entity_id: String,
    pub name: String,
    #[schema(value_type = Vec<String>)]
    pub actions: BTreeSet<String>,
    #[schema(value_type = Vec<String>)]
    pub members: BTreeSet<String>,
    pub built_in: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Role {
    pub fn new<A, M>(entity_id: &str, name: &str, actions: A, members: M, built_in: bool) -> Self
    where
        A: IntoIterator<Item = String>,
        M: IntoIterator<Item = String>,
    {
        Self {
            entity_id: entity_id.to_string(),
            name: name.to_string(),
            actions: actions.into_iter().collect(),
            members: members.into_iter().collect(),
            built_in,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RolePage {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RoleMembersPage {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub members: Vec<String>,
}
