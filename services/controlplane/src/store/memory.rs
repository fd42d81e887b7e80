//! In-memory implementation of the control-plane store.
//!
//! # Purpose
//! Implements every repository trait entirely in memory. It exists for local
//! development, tests, and deployments that do not need durability.
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Single-process consistency**: all tables live behind one
//!   `tokio::sync::RwLock`, so every mutation (including cascades and the
//!   emptiness check of a group delete) is atomic with respect to every other
//!   operation. Reads proceed concurrently.
//! - **No multi-node coordination**: each process has independent state.
//!
//! # Hierarchy queries
//! Paths are stored as strings and parsed into [`HierarchyPath`] for prefix
//! tests and ordering, which reproduces the `ltree` semantics of the Postgres
//! backend: strict ancestry, label-wise ordering (pre-order), and depth
//! bounding by label count.
//!
//! # Performance characteristics
//! Hierarchy walks and cascades scan the group table. That is fine for
//! development workloads and would be inefficient at large scale.
use super::{
    ControlPlaneStore, EntityRepository, GroupRepository, PolicyRepository, RoleRepository,
    StoreConfig,
};
use crate::errors::{Error, Result};
use crate::model::{
    Channel, Connection, Domain, EntityInfo, EntityStatus, Group, GroupsPage, HierarchyPath,
    HierarchyQuery, MembersPage, Membership, Metadata, Policy, PolicyFilter, PolicyPage, Role,
    RoleMembersPage, RolePage, Thing, metadata_matches,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory control-plane store.
///
/// Cloning shares the underlying state.
#[derive(Clone)]
pub struct InMemoryStore {
    config: StoreConfig,
    state: Arc<RwLock<State>>,
}

#[derive(Default)]
struct State {
    groups: HashMap<String, Group>,
    /// Keyed by `(group_id, member_id)`.
    relations: BTreeMap<(String, String), Membership>,
    /// Keyed by `(subject, object)`.
    policies: BTreeMap<(String, String), Policy>,
    /// Keyed by `(entity_id, name)`.
    roles: BTreeMap<(String, String), Role>,
    domains: HashMap<String, Domain>,
    things: HashMap<String, Thing>,
    /// Thing key to thing id.
    thing_keys: HashMap<String, String>,
    channels: HashMap<String, Channel>,
    /// Keyed by `(thing_id, channel_id)`.
    connections: BTreeMap<(String, String), Connection>,
}

impl InMemoryStore {
    /// Empty store bounded by `config`.
    ///
    /// # What it does
    /// Holds every table in one `RwLock`, so each repository call is atomic
    /// with respect to the others.
    ///
    /// # Errors
    /// - Does not fail.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(State::default())),
        }
    }
}

impl State {
    fn group_path(&self, id: &str) -> Result<HierarchyPath> {
        let group = self
            .groups
            .get(id)
            .ok_or_else(|| Error::GroupNotFound(id.to_string()))?;
        HierarchyPath::parse(&group.path)
    }

    fn entity_exists(&self, id: &str) -> bool {
        self.domains.contains_key(id)
            || self.groups.contains_key(id)
            || self.things.contains_key(id)
            || self.channels.contains_key(id)
    }

    fn role_mut(&mut self, entity_id: &str, name: &str) -> Result<&mut Role> {
        self.roles
            .get_mut(&(entity_id.to_string(), name.to_string()))
            .ok_or_else(|| Error::NotFound(format!("role {name} on {entity_id}")))
    }

    fn role(&self, entity_id: &str, name: &str) -> Result<&Role> {
        self.roles
            .get(&(entity_id.to_string(), name.to_string()))
            .ok_or_else(|| Error::NotFound(format!("role {name} on {entity_id}")))
    }

    /// Validates that none of `roles` exists yet; call before mutating.
    fn check_new_roles(&self, roles: &[Role]) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for role in roles {
            let key = (role.entity_id.clone(), role.name.clone());
            if self.roles.contains_key(&key) || !seen.insert(key) {
                return Err(Error::Conflict(format!(
                    "role {} already exists on {}",
                    role.name, role.entity_id
                )));
            }
        }
        Ok(())
    }

    fn insert_roles(&mut self, roles: Vec<Role>) -> Vec<Role> {
        for role in &roles {
            self.roles
                .insert((role.entity_id.clone(), role.name.clone()), role.clone());
        }
        roles
    }

    /// Drops every policy, role, role membership and group membership that
    /// references `id`.
    fn purge_references(&mut self, id: &str) {
        self.policies
            .retain(|(subject, object), _| subject != id && object != id);
        self.roles.retain(|(entity_id, _), _| entity_id != id);
        for role in self.roles.values_mut() {
            role.members.remove(id);
        }
        self.relations
            .retain(|(group_id, member_id), _| group_id != id && member_id != id);
    }

    fn entity_info(&self, id: &str) -> Option<EntityInfo> {
        if let Some(domain) = self.domains.get(id) {
            return Some(domain.into());
        }
        if let Some(group) = self.groups.get(id) {
            return Some(group.into());
        }
        if let Some(thing) = self.things.get(id) {
            return Some(thing.into());
        }
        self.channels.get(id).map(Into::into)
    }
}

fn sort_by_path(groups: &mut [Group]) {
    groups.sort_by_cached_key(|group| HierarchyPath::parse(&group.path).ok());
}

fn page<T>(items: impl IntoIterator<Item = T>, offset: u64, limit: u64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect()
}

fn record_group_gauge(state: &State) {
    metrics::gauge!("arbiter_groups_total").set(state.groups.len() as f64);
}

#[async_trait]
impl GroupRepository for InMemoryStore {
    async fn save_group_with_roles(&self, mut group: Group, roles: Vec<Role>) -> Result<Group> {
        group.validate()?;
        if !group.group_type.is_empty() {
            self.config.group_types.resolve(&group.group_type)?;
        }

        let mut state = self.state.write().await;
        if state.groups.contains_key(&group.id) {
            return Err(Error::GroupConflict(group.id));
        }
        let path = match group.parent_id.as_deref() {
            None => {
                if group.group_type.is_empty() {
                    return Err(Error::MalformedEntity(
                        "root group requires a type".to_string(),
                    ));
                }
                HierarchyPath::root(&group.id)
            }
            Some(parent_id) => {
                let parent = state.groups.get(parent_id).ok_or_else(|| {
                    Error::MalformedEntity(format!("parent group {parent_id} not found"))
                })?;
                let parent_path = HierarchyPath::parse(&parent.path)?;
                if parent_path.level() + 1 > self.config.max_level {
                    return Err(Error::MalformedEntity(format!(
                        "group hierarchy is limited to {} levels",
                        self.config.max_level
                    )));
                }
                group.group_type = parent.group_type.clone();
                group.domain_id = parent.domain_id.clone();
                parent_path.child(&group.id)
            }
        };
        state.check_new_roles(&roles)?;

        group.path = path.to_string();
        group.level = path.level();
        state.groups.insert(group.id.clone(), group.clone());
        state.insert_roles(roles);
        record_group_gauge(&state);
        metrics::counter!("arbiter_group_changes_total", "op" => "created").increment(1);
        Ok(group)
    }

    async fn update_group(&self, group: Group) -> Result<Group> {
        group.validate()?;
        let mut state = self.state.write().await;
        let stored = state
            .groups
            .get_mut(&group.id)
            .ok_or_else(|| Error::GroupNotFound(group.id.clone()))?;
        stored.name = group.name;
        stored.description = group.description;
        stored.metadata = group.metadata;
        stored.updated_at = Some(group.updated_at.unwrap_or_else(Utc::now));
        let mut updated = stored.clone();
        updated.level = HierarchyPath::parse(&updated.path)?.level();
        metrics::counter!("arbiter_group_changes_total", "op" => "updated").increment(1);
        Ok(updated)
    }

    async fn delete_group(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let target = state.group_path(id)?;
        let subtree: Vec<String> = state
            .groups
            .values()
            .filter(|group| {
                HierarchyPath::parse(&group.path)
                    .map(|path| path == target || path.is_descendant_of(&target))
                    .unwrap_or(false)
            })
            .map(|group| group.id.clone())
            .collect();
        if state
            .relations
            .keys()
            .any(|(group_id, _)| subtree.contains(group_id))
        {
            return Err(Error::GroupNotEmpty(id.to_string()));
        }
        for group_id in &subtree {
            state.groups.remove(group_id);
            state.purge_references(group_id);
        }
        record_group_gauge(&state);
        metrics::counter!("arbiter_group_changes_total", "op" => "deleted").increment(1);
        Ok(())
    }

    async fn retrieve_group(&self, id: &str) -> Result<Group> {
        let state = self.state.read().await;
        state
            .groups
            .get(id)
            .cloned()
            .ok_or_else(|| Error::GroupNotFound(id.to_string()))
    }

    async fn retrieve_all_groups(
        &self,
        domain_id: Option<&str>,
        query: &HierarchyQuery,
    ) -> Result<Vec<Group>> {
        let level = self.config.clamp_level(query.level);
        let state = self.state.read().await;
        let mut groups: Vec<Group> = state
            .groups
            .values()
            .filter(|group| group.level <= level)
            .filter(|group| domain_id.is_none_or(|domain| group.domain_id == domain))
            .filter(|group| metadata_matches(&group.metadata, query.metadata.as_ref()))
            .cloned()
            .collect();
        sort_by_path(&mut groups);
        Ok(groups)
    }

    async fn retrieve_all_parents(&self, id: &str, query: &HierarchyQuery) -> Result<Vec<Group>> {
        let level = self.config.clamp_level(query.level);
        let state = self.state.read().await;
        let target = state.group_path(id)?;
        let mut groups: Vec<Group> = state
            .groups
            .values()
            .filter(|group| {
                HierarchyPath::parse(&group.path)
                    .map(|path| path.is_ancestor_of(&target) && target.distance(&path) <= level)
                    .unwrap_or(false)
            })
            .filter(|group| metadata_matches(&group.metadata, query.metadata.as_ref()))
            .cloned()
            .collect();
        sort_by_path(&mut groups);
        Ok(groups)
    }

    async fn retrieve_all_children(
        &self,
        id: &str,
        query: &HierarchyQuery,
    ) -> Result<Vec<Group>> {
        let level = self.config.clamp_level(query.level);
        let state = self.state.read().await;
        let target = state.group_path(id)?;
        let mut groups: Vec<Group> = state
            .groups
            .values()
            .filter(|group| {
                HierarchyPath::parse(&group.path)
                    .map(|path| path.is_descendant_of(&target) && path.distance(&target) <= level)
                    .unwrap_or(false)
            })
            .filter(|group| metadata_matches(&group.metadata, query.metadata.as_ref()))
            .cloned()
            .collect();
        sort_by_path(&mut groups);
        Ok(groups)
    }

    async fn members(
        &self,
        group_id: &str,
        offset: u64,
        limit: u64,
        metadata: Option<&Metadata>,
    ) -> Result<MembersPage> {
        let state = self.state.read().await;
        let group = state
            .groups
            .get(group_id)
            .ok_or_else(|| Error::GroupNotFound(group_id.to_string()))?;
        let members: Vec<Membership> = if metadata_matches(&group.metadata, metadata) {
            state
                .relations
                .iter()
                .filter(|((gid, _), _)| gid == group_id)
                .map(|(_, membership)| membership.clone())
                .collect()
        } else {
            Vec::new()
        };
        Ok(MembersPage {
            total: members.len() as u64,
            offset,
            limit,
            members: page(members, offset, limit),
        })
    }

    async fn memberships(
        &self,
        member_id: &str,
        domain_id: Option<&str>,
        offset: u64,
        limit: u64,
        metadata: Option<&Metadata>,
    ) -> Result<GroupsPage> {
        let state = self.state.read().await;
        let mut groups: Vec<Group> = state
            .relations
            .keys()
            .filter(|(_, mid)| mid == member_id)
            .filter_map(|(group_id, _)| state.groups.get(group_id))
            .filter(|group| domain_id.is_none_or(|domain| group.domain_id == domain))
            .filter(|group| metadata_matches(&group.metadata, metadata))
            .cloned()
            .collect();
        sort_by_path(&mut groups);
        Ok(GroupsPage {
            total: groups.len() as u64,
            offset,
            limit,
            groups: page(groups, offset, limit),
        })
    }

    async fn assign(&self, member_id: &str, group_id: &str) -> Result<Membership> {
        if member_id.is_empty() {
            return Err(Error::MalformedEntity("member id is required".to_string()));
        }
        let mut state = self.state.write().await;
        let group_type = state
            .groups
            .get(group_id)
            .map(|group| group.group_type.clone())
            .ok_or_else(|| Error::MalformedEntity(format!("group {group_id} not found")))?;
        let key = (group_id.to_string(), member_id.to_string());
        if state.relations.contains_key(&key) {
            return Err(Error::MemberAlreadyAssigned {
                group_id: group_id.to_string(),
                member_id: member_id.to_string(),
            });
        }
        let membership = Membership {
            group_id: group_id.to_string(),
            member_id: member_id.to_string(),
            group_type,
            created_at: Utc::now(),
            updated_at: None,
        };
        state.relations.insert(key, membership.clone());
        Ok(membership)
    }

    async fn unassign(&self, member_id: &str, group_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .relations
            .remove(&(group_id.to_string(), member_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| {
                Error::NotFound(format!("member {member_id} is not in group {group_id}"))
            })
    }
}

#[async_trait]
impl PolicyRepository for InMemoryStore {
    async fn save_policy(&self, policy: Policy) -> Result<Policy> {
        let mut state = self.state.write().await;
        let key = (policy.subject.clone(), policy.object.clone());
        if state.policies.contains_key(&key) {
            return Err(Error::Conflict(format!(
                "policy for {} on {} already exists",
                policy.subject, policy.object
            )));
        }
        state.policies.insert(key, policy.clone());
        Ok(policy)
    }

    async fn update_policy(&self, policy: Policy) -> Result<Policy> {
        let mut state = self.state.write().await;
        let stored = state
            .policies
            .get_mut(&(policy.subject.clone(), policy.object.clone()))
            .ok_or_else(|| Error::NotFound("policy".to_string()))?;
        stored.actions = policy.actions;
        stored.updated_at = Some(policy.updated_at.unwrap_or_else(Utc::now));
        Ok(stored.clone())
    }

    async fn delete_policy(&self, subject: &str, object: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .policies
            .remove(&(subject.to_string(), object.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound("policy".to_string()))
    }

    async fn retrieve_policy(&self, subject: &str, object: &str) -> Result<Policy> {
        let state = self.state.read().await;
        state
            .policies
            .get(&(subject.to_string(), object.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound("policy".to_string()))
    }

    async fn list_policies(
        &self,
        filter: &PolicyFilter,
        offset: u64,
        limit: u64,
    ) -> Result<PolicyPage> {
        let state = self.state.read().await;
        let policies: Vec<Policy> = state
            .policies
            .values()
            .filter(|policy| filter.matches(policy))
            .cloned()
            .collect();
        Ok(PolicyPage {
            total: policies.len() as u64,
            offset,
            limit,
            policies: page(policies, offset, limit),
        })
    }

    async fn subject_policies(&self, subject: &str, objects: &[String]) -> Result<Vec<Policy>> {
        let state = self.state.read().await;
        Ok(objects
            .iter()
            .filter_map(|object| {
                state
                    .policies
                    .get(&(subject.to_string(), object.clone()))
                    .cloned()
            })
            .collect())
    }
}

#[async_trait]
impl RoleRepository for InMemoryStore {
    async fn add_roles(&self, roles: Vec<Role>) -> Result<Vec<Role>> {
        let mut state = self.state.write().await;
        state.check_new_roles(&roles)?;
        Ok(state.insert_roles(roles))
    }

    async fn retrieve_role(&self, entity_id: &str, name: &str) -> Result<Role> {
        let state = self.state.read().await;
        state.role(entity_id, name).cloned()
    }

    async fn retrieve_all_roles(
        &self,
        entity_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<RolePage> {
        let state = self.state.read().await;
        let roles: Vec<Role> = state
            .roles
            .iter()
            .filter(|((eid, _), _)| eid == entity_id)
            .map(|(_, role)| role.clone())
            .collect();
        Ok(RolePage {
            total: roles.len() as u64,
            offset,
            limit,
            roles: page(roles, offset, limit),
        })
    }

    async fn remove_role(&self, entity_id: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .roles
            .remove(&(entity_id.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("role {name} on {entity_id}")))
    }

    async fn update_role_name(&self, entity_id: &str, name: &str, new_name: &str) -> Result<Role> {
        let mut state = self.state.write().await;
        let new_key = (entity_id.to_string(), new_name.to_string());
        if state.roles.contains_key(&new_key) {
            return Err(Error::Conflict(format!(
                "role {new_name} already exists on {entity_id}"
            )));
        }
        let mut role = state
            .roles
            .remove(&(entity_id.to_string(), name.to_string()))
            .ok_or_else(|| Error::NotFound(format!("role {name} on {entity_id}")))?;
        role.name = new_name.to_string();
        role.updated_at = Some(Utc::now());
        state.roles.insert(new_key, role.clone());
        Ok(role)
    }

    async fn role_add_actions(
        &self,
        entity_id: &str,
        name: &str,
        actions: &[String],
    ) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        let role = state.role_mut(entity_id, name)?;
        role.actions.extend(actions.iter().cloned());
        role.updated_at = Some(Utc::now());
        Ok(role.actions.iter().cloned().collect())
    }

    async fn role_remove_actions(
        &self,
        entity_id: &str,
        name: &str,
        actions: &[String],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let role = state.role_mut(entity_id, name)?;
        for action in actions {
            role.actions.remove(action);
        }
        role.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn role_remove_all_actions(&self, entity_id: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let role = state.role_mut(entity_id, name)?;
        role.actions.clear();
        role.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn role_add_members(
        &self,
        entity_id: &str,
        name: &str,
        members: &[String],
    ) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        let role = state.role_mut(entity_id, name)?;
        role.members.extend(members.iter().cloned());
        role.updated_at = Some(Utc::now());
        Ok(role.members.iter().cloned().collect())
    }

    async fn role_remove_members(
        &self,
        entity_id: &str,
        name: &str,
        members: &[String],
        min_remaining: u64,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let role = state.role_mut(entity_id, name)?;
        let remaining = role
            .members
            .iter()
            .filter(|member| !members.contains(member))
            .count() as u64;
        if remaining < min_remaining {
            return Err(Error::MalformedEntity(format!(
                "role {name} must keep at least {min_remaining} member(s)"
            )));
        }
        for member in members {
            role.members.remove(member);
        }
        role.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn role_remove_all_members(&self, entity_id: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let role = state.role_mut(entity_id, name)?;
        role.members.clear();
        role.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn role_list_actions(&self, entity_id: &str, name: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state.role(entity_id, name)?.actions.iter().cloned().collect())
    }

    async fn role_list_members(
        &self,
        entity_id: &str,
        name: &str,
        offset: u64,
        limit: u64,
    ) -> Result<RoleMembersPage> {
        let state = self.state.read().await;
        let role = state.role(entity_id, name)?;
        Ok(RoleMembersPage {
            total: role.members.len() as u64,
            offset,
            limit,
            members: page(role.members.iter().cloned(), offset, limit),
        })
    }

    async fn role_check_actions_exists(
        &self,
        entity_id: &str,
        name: &str,
        actions: &[String],
    ) -> Result<bool> {
        let state = self.state.read().await;
        let role = state.role(entity_id, name)?;
        Ok(actions.iter().all(|action| role.actions.contains(action)))
    }

    async fn role_check_members_exists(
        &self,
        entity_id: &str,
        name: &str,
        members: &[String],
    ) -> Result<bool> {
        let state = self.state.read().await;
        let role = state.role(entity_id, name)?;
        Ok(members.iter().all(|member| role.members.contains(member)))
    }

    async fn member_roles(&self, entity_ids: &[String], member_id: &str) -> Result<Vec<Role>> {
        let state = self.state.read().await;
        Ok(state
            .roles
            .values()
            .filter(|role| entity_ids.contains(&role.entity_id) && role.members.contains(member_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EntityRepository for InMemoryStore {
    async fn save_domain(&self, domain: Domain, roles: Vec<Role>) -> Result<Domain> {
        let mut state = self.state.write().await;
        if state.entity_exists(&domain.id) {
            return Err(Error::Conflict(format!("entity {} already exists", domain.id)));
        }
        state.check_new_roles(&roles)?;
        state.domains.insert(domain.id.clone(), domain.clone());
        state.insert_roles(roles);
        Ok(domain)
    }

    async fn retrieve_domain(&self, id: &str) -> Result<Domain> {
        let state = self.state.read().await;
        state
            .domains
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("domain {id}")))
    }

    async fn save_thing(&self, thing: Thing, roles: Vec<Role>) -> Result<Thing> {
        let mut state = self.state.write().await;
        if !state.domains.contains_key(&thing.domain_id) {
            return Err(Error::NotFound(format!("domain {}", thing.domain_id)));
        }
        if state.entity_exists(&thing.id) {
            return Err(Error::Conflict(format!("entity {} already exists", thing.id)));
        }
        if state.thing_keys.contains_key(&thing.key) {
            return Err(Error::Conflict("thing key already in use".to_string()));
        }
        state.check_new_roles(&roles)?;
        state.thing_keys.insert(thing.key.clone(), thing.id.clone());
        state.things.insert(thing.id.clone(), thing.clone());
        state.insert_roles(roles);
        Ok(thing)
    }

    async fn retrieve_thing(&self, id: &str) -> Result<Thing> {
        let state = self.state.read().await;
        state
            .things
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("thing {id}")))
    }

    async fn retrieve_thing_by_key(&self, key: &str) -> Result<Thing> {
        let state = self.state.read().await;
        state
            .thing_keys
            .get(key)
            .and_then(|id| state.things.get(id))
            .cloned()
            .ok_or_else(|| Error::NotFound("thing".to_string()))
    }

    async fn change_thing_status(&self, id: &str, status: EntityStatus) -> Result<Thing> {
        let mut state = self.state.write().await;
        let thing = state
            .things
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("thing {id}")))?;
        thing.status = status;
        thing.updated_at = Some(Utc::now());
        Ok(thing.clone())
    }

    async fn remove_thing(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let thing = state
            .things
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("thing {id}")))?;
        state.thing_keys.remove(&thing.key);
        state.connections.retain(|(thing_id, _), _| thing_id != id);
        state.purge_references(id);
        Ok(())
    }

    async fn save_channel(&self, channel: Channel, roles: Vec<Role>) -> Result<Channel> {
        let mut state = self.state.write().await;
        if !state.domains.contains_key(&channel.domain_id) {
            return Err(Error::NotFound(format!("domain {}", channel.domain_id)));
        }
        if state.entity_exists(&channel.id) {
            return Err(Error::Conflict(format!(
                "entity {} already exists",
                channel.id
            )));
        }
        state.check_new_roles(&roles)?;
        state.channels.insert(channel.id.clone(), channel.clone());
        state.insert_roles(roles);
        Ok(channel)
    }

    async fn retrieve_channel(&self, id: &str) -> Result<Channel> {
        let state = self.state.read().await;
        state
            .channels
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))
    }

    async fn change_channel_status(&self, id: &str, status: EntityStatus) -> Result<Channel> {
        let mut state = self.state.write().await;
        let channel = state
            .channels
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        channel.status = status;
        channel.updated_at = Some(Utc::now());
        Ok(channel.clone())
    }

    async fn remove_channel(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .channels
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        state.connections.retain(|(_, channel_id), _| channel_id != id);
        state.purge_references(id);
        Ok(())
    }

    async fn retrieve_entity(&self, id: &str) -> Result<EntityInfo> {
        let state = self.state.read().await;
        state
            .entity_info(id)
            .ok_or_else(|| Error::NotFound(format!("entity {id}")))
    }

    async fn retrieve_entities(&self, ids: &[String]) -> Result<Vec<EntityInfo>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.entity_info(id)).collect())
    }

    async fn add_connections(&self, connections: &[Connection]) -> Result<Vec<Connection>> {
        let mut state = self.state.write().await;
        let mut resolved = Vec::with_capacity(connections.len());
        for conn in connections {
            let thing = state
                .things
                .get(&conn.thing_id)
                .ok_or_else(|| Error::NotFound(format!("thing {}", conn.thing_id)))?;
            let channel = state
                .channels
                .get(&conn.channel_id)
                .ok_or_else(|| Error::NotFound(format!("channel {}", conn.channel_id)))?;
            if thing.domain_id != channel.domain_id
                || (!conn.domain_id.is_empty() && conn.domain_id != thing.domain_id)
            {
                return Err(Error::MalformedEntity(format!(
                    "thing {} and channel {} are not in the same domain",
                    conn.thing_id, conn.channel_id
                )));
            }
            resolved.push(Connection {
                thing_id: conn.thing_id.clone(),
                channel_id: conn.channel_id.clone(),
                domain_id: thing.domain_id.clone(),
            });
        }
        for conn in &resolved {
            state
                .connections
                .insert((conn.thing_id.clone(), conn.channel_id.clone()), conn.clone());
        }
        Ok(resolved)
    }

    async fn remove_connections(&self, connections: &[Connection]) -> Result<()> {
        let mut state = self.state.write().await;
        for conn in connections {
            state
                .connections
                .remove(&(conn.thing_id.clone(), conn.channel_id.clone()));
        }
        Ok(())
    }

    async fn has_connection(&self, thing_id: &str, channel_id: &str) -> Result<bool> {
        let state = self.state.read().await;
        let connected = state
            .connections
            .contains_key(&(thing_id.to_string(), channel_id.to_string()));
        let thing_enabled = state
            .things
            .get(thing_id)
            .is_some_and(|thing| thing.status == EntityStatus::Enabled);
        let channel_enabled = state
            .channels
            .get(channel_id)
            .is_some_and(|channel| channel.status == EntityStatus::Enabled);
        Ok(connected && thing_enabled && channel_enabled)
    }
}

#[async_trait]
impl ControlPlaneStore for InMemoryStore {
    fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn entity_repository(self: Arc<Self>) -> Arc<dyn EntityRepository> {
        self
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
