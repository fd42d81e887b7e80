//! Group hierarchy records, memberships, and the group type catalogue.
use crate::errors::{Error, Result};
use crate::model::metadata::{METADATA_MAX_BYTES, Metadata};
use crate::model::path::is_valid_label;
use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

pub const GROUP_ID_MAX: usize = 254;
pub const GROUP_NAME_MAX: usize = 1024;
pub const GROUP_DESCRIPTION_MAX: usize = 1024;

/// A node of the group hierarchy.
///
/// `path` and `level` are derived by the store on insert and recomputed on
/// every read; values supplied by callers are ignored. A child's `group_type`
/// is always its parent's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Group {
    pub id: String,
    pub domain_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub owner_id: String,
    #[serde(rename = "type", default)]
    pub group_type: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub level: u64,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Group {
    /// Checks the fields callers control. Type and parent checks need the
    /// catalogue and the store and happen there.
    pub fn validate(&self) -> Result<()> {
        validate_group_id(&self.id)?;
        if let Some(parent_id) = &self.parent_id {
            validate_group_id(parent_id)?;
        }
        if self.name.trim().is_empty() || self.name.len() > GROUP_NAME_MAX {
            return Err(Error::MalformedEntity(format!(
                "group name must be 1..={GROUP_NAME_MAX} bytes"
            )));
        }
        if self.description.len() > GROUP_DESCRIPTION_MAX {
            return Err(Error::MalformedEntity(format!(
                "group description exceeds {GROUP_DESCRIPTION_MAX} bytes"
            )));
        }
        if self.owner_id.is_empty() {
            return Err(Error::MalformedEntity("group owner is required".into()));
        }
        if self.parent_id.is_none() && self.domain_id.is_empty() {
            return Err(Error::MalformedEntity("root group requires a domain".into()));
        }
        let metadata_len = serde_json::to_vec(&self.metadata)
            .map(|bytes| bytes.len())
            .unwrap_or(usize::MAX);
        if metadata_len > METADATA_MAX_BYTES {
            return Err(Error::MalformedEntity(format!(
                "group metadata exceeds {METADATA_MAX_BYTES} bytes"
            )));
        }
        Ok(())
    }
}

/// Ids become path labels, so they are restricted to `[A-Za-z0-9_]`.
pub fn validate_group_id(id: &str) -> Result<()> {
    if id.len() > GROUP_ID_MAX || !is_valid_label(id) {
        return Err(Error::MalformedEntity(format!("invalid group id: {id:?}")));
    }
    Ok(())
}

/// Depth and metadata bounds of a hierarchy query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchyQuery {
    /// Maximum depth (for listings) or distance (for ancestor/descendant
    /// walks). Clamped to the store's maximum level.
    pub level: u64,
    pub metadata: Option<Metadata>,
}

impl HierarchyQuery {
    pub fn new(level: u64) -> Self {
        Self {
            level,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata).filter(|m| !m.is_empty());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Membership {
    pub group_id: String,
    pub member_id: String,
    #[serde(rename = "type")]
    pub group_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MembersPage {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub members: Vec<Membership>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GroupsPage {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub groups: Vec<Group>,
}

/// Registered group types, fixed for the lifetime of a store.
///
/// Names are what callers and the API use; the numeric ids are what the
/// Postgres backend persists, so an id must never be reassigned to another
/// name once data exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTypeCatalogue {
    by_name: BTreeMap<String, i16>,
}

impl Default for GroupTypeCatalogue {
    fn default() -> Self {
        Self {
            by_name: BTreeMap::from([
                ("org".to_string(), 1),
                ("site".to_string(), 2),
                ("fleet".to_string(), 3),
            ]),
        }
    }
}

impl GroupTypeCatalogue {
    pub fn new<I, S>(entries: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = (S, i16)>,
        S: Into<String>,
    {
        let mut by_name = BTreeMap::new();
        for (name, id) in entries {
            let name = name.into();
            if name.is_empty() {
                return Err(anyhow!("group type name must not be empty"));
            }
            if by_name.values().any(|existing| *existing == id) {
                return Err(anyhow!("group type id {id} registered twice"));
            }
            if by_name.insert(name.clone(), id).is_some() {
                return Err(anyhow!("group type {name} registered twice"));
            }
        }
        if by_name.is_empty() {
            return Err(anyhow!("at least one group type must be registered"));
        }
        Ok(Self { by_name })
    }

    /// Parses `name=id` pairs separated by commas, e.g. `org=1,site=2`.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut entries = Vec::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, id) = pair
                .split_once('=')
                .with_context(|| format!("group type entry {pair:?} is not name=id"))?;
            let id: i16 = id
                .trim()
                .parse()
                .with_context(|| format!("parse group type id in {pair:?}"))?;
            entries.push((name.trim().to_string(), id));
        }
        Self::new(entries)
    }

    pub fn id_of(&self, name: &str) -> Option<i16> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, id: i16) -> Option<&str> {
        self.by_name
            .iter()
            .find(|(_, value)| **value == id)
            .map(|(name, _)| name.as_str())
    }

    /// Resolves a registered name, failing with `InvalidGroupType`.
    pub fn resolve(&self, name: &str) -> Result<i16> {
        self.id_of(name)
            .ok_or_else(|| Error::InvalidGroupType(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }
}
