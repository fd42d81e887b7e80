//! Control-plane data model module.
//!
//! # Purpose
//! Re-exports the group hierarchy, membership, policy, role and entity models
//! shared by the store, service, gateway and HTTP layers.
mod entity;
mod group;
mod metadata;
mod path;
mod policy;
mod role;

pub use entity::{Channel, Connection, Domain, EntityInfo, EntityStatus, Thing};
pub use group::{
    GROUP_DESCRIPTION_MAX, GROUP_ID_MAX, GROUP_NAME_MAX, Group, GroupTypeCatalogue, GroupsPage,
    HierarchyQuery, Membership, MembersPage, validate_group_id,
};
pub use metadata::{METADATA_MAX_BYTES, Metadata, json_contains, metadata_matches};
pub use path::{HierarchyPath, PATH_SEPARATOR};
pub use policy::{Policy, PolicyFilter, PolicyPage};
pub use role::{Role, RoleMembersPage, RolePage};

/// Upper bound applied to every caller-supplied page size.
pub const MAX_PAGE_LIMIT: u64 = 1_000;
/// Page size used when the caller does not supply one.
pub const DEFAULT_PAGE_LIMIT: u64 = 10;
