//! Domains, things, channels and the thing-to-channel connections the
//! gateway authorizes against.
use arbiter_authz::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    #[default]
    Enabled,
    Disabled,
}

impl EntityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityStatus::Enabled => "enabled",
            EntityStatus::Disabled => "disabled",
        }
    }

    pub fn as_i16(self) -> i16 {
        match self {
            EntityStatus::Enabled => 0,
            EntityStatus::Disabled => 1,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(EntityStatus::Enabled),
            1 => Some(EntityStatus::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Domain {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Thing {
    pub id: String,
    pub domain_id: String,
    pub owner_id: String,
    pub name: String,
    /// Credential presented by the device to protocol adapters.
    pub key: String,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Channel {
    pub id: String,
    pub domain_id: String,
    pub owner_id: String,
    pub name: String,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct Connection {
    pub thing_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub domain_id: String,
}

/// Kind, tenancy, ownership and status of any entity, as needed by access
/// decisions and the gateway's entity lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EntityInfo {
    pub id: String,
    #[schema(value_type = String)]
    pub kind: EntityKind,
    pub domain_id: String,
    pub owner_id: String,
    pub status: EntityStatus,
}

impl From<&Domain> for EntityInfo {
    fn from(domain: &Domain) -> Self {
        Self {
            id: domain.id.clone(),
            kind: EntityKind::Domain,
            domain_id: domain.id.clone(),
            owner_id: domain.owner_id.clone(),
            status: domain.status,
        }
    }
}

impl From<&Thing> for EntityInfo {
    fn from(thing: &Thing) -> Self {
        Self {
            id: thing.id.clone(),
            kind: EntityKind::Thing,
            domain_id: thing.domain_id.clone(),
            owner_id: thing.owner_id.clone(),
            status: thing.status,
        }
    }
}

impl From<&Channel> for EntityInfo {
    fn from(channel: &Channel) -> Self {
        Self {
            id: channel.id.clone(),
            kind: EntityKind::Channel,
            domain_id: channel.domain_id.clone(),
            owner_id: channel.owner_id.clone(),
            status: channel.status,
        }
    }
}

impl From<&crate::model::Group> for EntityInfo {
    fn from(group: &crate::model::Group) -> Self {
        Self {
            id: group.id.clone(),
            kind: EntityKind::Group,
            domain_id: group.domain_id.clone(),
            owner_id: group.owner_id.clone(),
            status: EntityStatus::Enabled,
        }
    }
}
