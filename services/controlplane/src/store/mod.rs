//! Authoritative storage for the control plane.
//!
//! # Purpose
//! Declares the repository traits for the group hierarchy, policies, roles and
//! the entity registry, and the combined [`ControlPlaneStore`] every backend
//! implements.
//!
//! # Backends
//! - [`memory::InMemoryStore`]: single-process, non-durable; used in
//!   development and tests.
//! - [`postgres::PostgresStore`]: durable; `ltree` paths, `jsonb` metadata and
//!   transactional cascades.
//!
//! # Key invariants
//! - A group's path is its parent's path plus its own id; level is the path
//!   depth. Backends derive both and never trust caller-supplied values.
//! - Ancestor and descendant walks exclude the named group and are bounded by
//!   `min(query.level, StoreConfig::max_level)`.
//! - Deleting an entity removes the policies and roles that reference it in
//!   the same unit of work.
//! - Built-in roles passed to `save_*` are inserted atomically with their
//!   entity.
use crate::errors::Result;
use crate::model::{
    Channel, Connection, Domain, EntityInfo, EntityStatus, Group, GroupTypeCatalogue, GroupsPage,
    HierarchyQuery, MembersPage, Membership, Metadata, Policy, PolicyFilter, PolicyPage, Role,
    RoleMembersPage, RolePage, Thing,
};
use async_trait::async_trait;
use std::sync::Arc;

pub mod memory;
pub mod postgres;

/// Maximum group depth when none is configured.
pub const DEFAULT_MAX_LEVEL: u64 = 5;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Deepest level a group may sit at; also the bound for hierarchy walks.
    pub max_level: u64,
    pub group_types: GroupTypeCatalogue,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_level: DEFAULT_MAX_LEVEL,
            group_types: GroupTypeCatalogue::default(),
        }
    }
}

impl StoreConfig {
    pub fn clamp_level(&self, level: u64) -> u64 {
        level.min(self.max_level)
    }
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    /// Inserts a group. Roots need a registered type; children inherit type,
    /// domain and path from their parent.
    ///
    /// # Errors
    /// - `MalformedEntity` for a missing parent, a typeless root or a group
    ///   that would sit deeper than `StoreConfig::max_level`.
    /// - `InvalidGroupType` for an unregistered type.
    /// - `GroupConflict` when the id is taken.
    async fn save_group(&self, group: Group) -> Result<Group> {
        self.save_group_with_roles(group, Vec::new()).await
    }
    /// [`GroupRepository::save_group`] plus the group's built-in roles in the
    /// same unit of work.
    async fn save_group_with_roles(&self, group: Group, roles: Vec<Role>) -> Result<Group>;
    /// Updates name, description and metadata only.
    async fn update_group(&self, group: Group) -> Result<Group>;
    /// Deletes the group and its descendants unless any of them has members.
    ///
    /// # What it does
    /// Removes the subtree together with the policies and roles naming any
    /// group in it.
    ///
    /// # Errors
    /// - `GroupNotFound` when `id` does not exist.
    /// - `GroupNotEmpty` when any group in the subtree has a member, even if
    ///   `id` itself has none.
    async fn delete_group(&self, id: &str) -> Result<()>;
    async fn retrieve_group(&self, id: &str) -> Result<Group>;
    /// Groups with `level <= query.level`, in path order.
    async fn retrieve_all_groups(
        &self,
        domain_id: Option<&str>,
        query: &HierarchyQuery,
    ) -> Result<Vec<Group>>;
    async fn retrieve_all_parents(&self, id: &str, query: &HierarchyQuery) -> Result<Vec<Group>>;
    async fn retrieve_all_children(&self, id: &str, query: &HierarchyQuery)
    -> Result<Vec<Group>>;
    /// Members of `group_id`; the metadata filter applies to the group.
    async fn members(
        &self,
        group_id: &str,
        offset: u64,
        limit: u64,
        metadata: Option<&Metadata>,
    ) -> Result<MembersPage>;
    /// Groups `member_id` belongs to, in path order.
    async fn memberships(
        &self,
        member_id: &str,
        domain_id: Option<&str>,
        offset: u64,
        limit: u64,
        metadata: Option<&Metadata>,
    ) -> Result<GroupsPage>;
    /// # Errors
    /// - `MalformedEntity` for an empty member id or an unknown group.
    /// - `MemberAlreadyAssigned` when the pair already exists.
    async fn assign(&self, member_id: &str, group_id: &str) -> Result<Membership>;
    /// Fails with `NotFound` when the member is not in the group.
    async fn unassign(&self, member_id: &str, group_id: &str) -> Result<()>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// # Errors
    /// - `Conflict` when `(subject, object)` already has a policy.
    async fn save_policy(&self, policy: Policy) -> Result<Policy>;
    /// Replaces the action set of an existing policy.
    async fn update_policy(&self, policy: Policy) -> Result<Policy>;
    async fn delete_policy(&self, subject: &str, object: &str) -> Result<()>;
    async fn retrieve_policy(&self, subject: &str, object: &str) -> Result<Policy>;
    async fn list_policies(
        &self,
        filter: &PolicyFilter,
        offset: u64,
        limit: u64,
    ) -> Result<PolicyPage>;
    /// Policies held by `subject` on any of `objects`.
    async fn subject_policies(&self, subject: &str, objects: &[String]) -> Result<Vec<Policy>>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn add_roles(&self, roles: Vec<Role>) -> Result<Vec<Role>>;
    async fn retrieve_role(&self, entity_id: &str, name: &str) -> Result<Role>;
    async fn retrieve_all_roles(&self, entity_id: &str, offset: u64, limit: u64)
    -> Result<RolePage>;
    async fn remove_role(&self, entity_id: &str, name: &str) -> Result<()>;
    async fn update_role_name(&self, entity_id: &str, name: &str, new_name: &str)
    -> Result<Role>;
    /// Returns the role's full action set after the change.
    async fn role_add_actions(
        &self,
        entity_id: &str,
        name: &str,
        actions: &[String],
    ) -> Result<Vec<String>>;
    async fn role_remove_actions(&self, entity_id: &str, name: &str, actions: &[String])
    -> Result<()>;
    async fn role_remove_all_actions(&self, entity_id: &str, name: &str) -> Result<()>;
    /// Returns the role's full member list after the change.
    async fn role_add_members(
        &self,
        entity_id: &str,
        name: &str,
        members: &[String],
    ) -> Result<Vec<String>>;
    /// Fails with `MalformedEntity`, leaving the role untouched, when fewer
    /// than `min_remaining` members would be left.
    async fn role_remove_members(
        &self,
        entity_id: &str,
        name: &str,
        members: &[String],
        min_remaining: u64,
    ) -> Result<()>;
    async fn role_remove_all_members(&self, entity_id: &str, name: &str) -> Result<()>;
    async fn role_list_actions(&self, entity_id: &str, name: &str) -> Result<Vec<String>>;
    async fn role_list_members(
        &self,
        entity_id: &str,
        name: &str,
        offset: u64,
        limit: u64,
    ) -> Result<RoleMembersPage>;
    async fn role_check_actions_exists(
        &self,
        entity_id: &str,
        name: &str,
        actions: &[String],
    ) -> Result<bool>;
    async fn role_check_members_exists(
        &self,
        entity_id: &str,
        name: &str,
        members: &[String],
    ) -> Result<bool>;
    /// Roles on any of `entity_ids` that list `member_id`.
    async fn member_roles(&self, entity_ids: &[String], member_id: &str) -> Result<Vec<Role>>;
}

#[async_trait]
pub trait EntityRepository: Send + Sync {
    async fn save_domain(&self, domain: Domain, roles: Vec<Role>) -> Result<Domain>;
    async fn retrieve_domain(&self, id: &str) -> Result<Domain>;

    async fn save_thing(&self, thing: Thing, roles: Vec<Role>) -> Result<Thing>;
    async fn retrieve_thing(&self, id: &str) -> Result<Thing>;
    async fn retrieve_thing_by_key(&self, key: &str) -> Result<Thing>;
    async fn change_thing_status(&self, id: &str, status: EntityStatus) -> Result<Thing>;
    /// Removes the thing, its connections, memberships, policies and roles.
    ///
    /// # Errors
    /// - `NotFound` for an unknown thing; nothing else is touched then.
    async fn remove_thing(&self, id: &str) -> Result<()>;

    async fn save_channel(&self, channel: Channel, roles: Vec<Role>) -> Result<Channel>;
    async fn retrieve_channel(&self, id: &str) -> Result<Channel>;
    /// Disabling keeps the channel's connections; [`EntityRepository::has_connection`]
    /// stops reporting them until it is enabled again.
    async fn change_channel_status(&self, id: &str, status: EntityStatus) -> Result<Channel>;
    async fn remove_channel(&self, id: &str) -> Result<()>;

    /// Looks `id` up across domains, groups, things and channels.
    async fn retrieve_entity(&self, id: &str) -> Result<EntityInfo>;
    /// Unknown ids are skipped.
    async fn retrieve_entities(&self, ids: &[String]) -> Result<Vec<EntityInfo>>;

    /// Idempotent; returns the connections with their domain filled in.
    ///
    /// # Errors
    /// - `NotFound` when either end is unknown.
    /// - `MalformedEntity` when thing and channel live in different domains.
    ///
    /// Validation covers the whole batch before anything is written.
    async fn add_connections(&self, connections: &[Connection]) -> Result<Vec<Connection>>;
    /// Idempotent.
    async fn remove_connections(&self, connections: &[Connection]) -> Result<()>;
    /// True when the pair is connected and both ends are enabled.
    async fn has_connection(&self, thing_id: &str, channel_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait ControlPlaneStore:
    GroupRepository + PolicyRepository + RoleRepository + EntityRepository
{
    fn config(&self) -> &StoreConfig;
    /// The same backend seen as its entity registry alone.
    fn entity_repository(self: Arc<Self>) -> Arc<dyn EntityRepository>;

    /// # What it does
    /// Runs the cheapest round-trip the backend has.
    ///
    /// # Errors
    /// - `ViewEntity` when the backend cannot be reached.
    async fn health_check(&self) -> Result<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
