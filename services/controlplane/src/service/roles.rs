//! Role management.
//!
//! # Purpose
//! Creates, renames and edits the roles attached to domains, groups, things
//! and channels, and seeds the built-in roles when an entity is created.
//!
//! # Key invariants
//! - Built-in role names are reserved: they cannot be added, removed, renamed
//!   or used as a rename target.
//! - Mandatory actions of a built-in role cannot be removed.
//! - A role that requires members (`admin`) always keeps at least one.
//! - Mutations need `manage_role` on the entity or the kind's delegated
//!   `<kind>_manage_role` on the entity's domain; reads need `read`.
use crate::authz::Evaluator;
use crate::errors::{Error, Result};
use crate::events::{EventLog, EventOperation};
use crate::model::{EntityInfo, Role, RoleMembersPage, RolePage};
use crate::service::{Session, clamp_limit};
use crate::store::ControlPlaneStore;
use arbiter_authz::{Action, BuiltInRole, EntityKind, builtin_role, builtin_roles};
use serde_json::json;
use std::sync::Arc;

/// Built-in roles for a freshly created entity, with `creator` seeded where
/// the role definition asks for it.
pub fn provision_builtin_roles(kind: EntityKind, entity_id: &str, creator: &str) -> Vec<Role> {
    builtin_roles(kind)
        .into_iter()
        .map(|definition| {
            let members = if definition.seed_creator {
                vec![creator.to_string()]
            } else {
                Vec::new()
            };
            Role::new(
                entity_id,
                definition.name,
                definition.actions.iter().map(|a| a.as_str().to_string()),
                members,
                true,
            )
        })
        .collect()
}

/// Actions that roles and policies on `kind` may carry.
pub fn list_available_actions(kind: EntityKind) -> Vec<String> {
    kind.actions()
        .iter()
        .map(|action| action.as_str().to_string())
        .collect()
}

#[derive(Clone)]
pub struct RoleManager {
    store: Arc<dyn ControlPlaneStore>,
    evaluator: Arc<Evaluator>,
    events: Arc<EventLog>,
}

impl RoleManager {
    pub fn new(
        store: Arc<dyn ControlPlaneStore>,
        evaluator: Arc<Evaluator>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            store,
            evaluator,
            events,
        }
    }

    pub async fn add_role(
        &self,
        session: &Session,
        entity_id: &str,
        name: &str,
        actions: Vec<String>,
        members: Vec<String>,
    ) -> Result<Role> {
        let entity = self.authorize_manage(session, entity_id).await?;
        validate_role_name(name)?;
        if builtin_role(entity.kind, name).is_some() {
            return Err(Error::Conflict(format!("role name {name} is reserved")));
        }
        let actions = validate_actions(entity.kind, &actions)?;
        validate_members(&members)?;
        let role = Role::new(entity_id, name, actions, members, false);
        let role = self
            .store
            .add_roles(vec![role])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::create(anyhow::anyhow!("role {name} was not stored")))?;
        self.publish(EventOperation::RoleAdd, &entity, json!({ "name": name }))
            .await;
        Ok(role)
    }

    pub async fn retrieve_role(&self, session: &Session, entity_id: &str, name: &str) -> Result<Role> {
        self.authorize_read(session, entity_id).await?;
        self.store.retrieve_role(entity_id, name).await
    }

    pub async fn retrieve_all_roles(
        &self,
        session: &Session,
        entity_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<RolePage> {
        self.authorize_read(session, entity_id).await?;
        self.store
            .retrieve_all_roles(entity_id, offset, clamp_limit(limit))
            .await
    }

    pub async fn remove_role(&self, session: &Session, entity_id: &str, name: &str) -> Result<()> {
        let entity = self.authorize_manage(session, entity_id).await?;
        if builtin_role(entity.kind, name).is_some() {
            return Err(Error::MalformedEntity(format!(
                "built-in role {name} cannot be removed"
            )));
        }
        self.store.remove_role(entity_id, name).await?;
        self.publish(EventOperation::RoleRemove, &entity, json!({ "name": name }))
            .await;
        Ok(())
    }

    pub async fn update_role_name(
        &self,
        session: &Session,
        entity_id: &str,
        name: &str,
        new_name: &str,
    ) -> Result<Role> {
        let entity = self.authorize_manage(session, entity_id).await?;
        validate_role_name(new_name)?;
        if builtin_role(entity.kind, name).is_some() {
            return Err(Error::MalformedEntity(format!(
                "built-in role {name} cannot be renamed"
            )));
        }
        if builtin_role(entity.kind, new_name).is_some() {
            return Err(Error::Conflict(format!("role name {new_name} is reserved")));
        }
        let role = self
            .store
            .update_role_name(entity_id, name, new_name)
            .await?;
        self.publish(
            EventOperation::RoleRename,
            &entity,
            json!({ "name": name, "new_name": new_name }),
        )
        .await;
        Ok(role)
    }

    pub async fn role_add_actions(
        &self,
        session: &Session,
        entity_id: &str,
        name: &str,
        actions: Vec<String>,
    ) -> Result<Vec<String>> {
        let entity = self.authorize_manage(session, entity_id).await?;
        if actions.is_empty() {
            return Err(Error::MalformedPolicyAct("no actions given".to_string()));
        }
        let actions = validate_actions(entity.kind, &actions)?;
        let all = self
            .store
            .role_add_actions(entity_id, name, &actions)
            .await?;
        self.publish(
            EventOperation::RoleActionsAdd,
            &entity,
            json!({ "name": name, "actions": actions }),
        )
        .await;
        Ok(all)
    }

    pub async fn role_remove_actions(
        &self,
        session: &Session,
        entity_id: &str,
        name: &str,
        actions: Vec<String>,
    ) -> Result<()> {
        let entity = self.authorize_manage(session, entity_id).await?;
        if let Some(definition) = builtin_role(entity.kind, name) {
            if let Some(action) = actions
                .iter()
                .find(|action| is_mandatory(&definition, action))
            {
                return Err(Error::MalformedEntity(format!(
                    "action {action} is mandatory for built-in role {name}"
                )));
            }
        }
        self.store
            .role_remove_actions(entity_id, name, &actions)
            .await?;
        self.publish(
            EventOperation::RoleActionsRemove,
            &entity,
            json!({ "name": name, "actions": actions }),
        )
        .await;
        Ok(())
    }

    pub async fn role_remove_all_actions(
        &self,
        session: &Session,
        entity_id: &str,
        name: &str,
    ) -> Result<()> {
        let entity = self.authorize_manage(session, entity_id).await?;
        if let Some(definition) = builtin_role(entity.kind, name) {
            if !definition.mandatory.is_empty() {
                return Err(Error::MalformedEntity(format!(
                    "built-in role {name} has mandatory actions"
                )));
            }
        }
        self.store.role_remove_all_actions(entity_id, name).await?;
        self.publish(
            EventOperation::RoleActionsRemove,
            &entity,
            json!({ "name": name, "all": true }),
        )
        .await;
        Ok(())
    }

    pub async fn role_add_members(
        &self,
        session: &Session,
        entity_id: &str,
        name: &str,
        members: Vec<String>,
    ) -> Result<Vec<String>> {
        let entity = self.authorize_manage(session, entity_id).await?;
        if members.is_empty() {
            return Err(Error::MalformedEntity("no members given".to_string()));
        }
        validate_members(&members)?;
        let all = self
            .store
            .role_add_members(entity_id, name, &members)
            .await?;
        self.publish(
            EventOperation::RoleMembersAdd,
            &entity,
            json!({ "name": name, "members": members }),
        )
        .await;
        Ok(all)
    }

    pub async fn role_remove_members(
        &self,
        session: &Session,
        entity_id: &str,
        name: &str,
        members: Vec<String>,
    ) -> Result<()> {
        let entity = self.authorize_manage(session, entity_id).await?;
        let min_remaining = match builtin_role(entity.kind, name) {
            Some(definition) if definition.requires_members => 1,
            _ => 0,
        };
        self.store
            .role_remove_members(entity_id, name, &members, min_remaining)
            .await?;
        self.publish(
            EventOperation::RoleMembersRemove,
            &entity,
            json!({ "name": name, "members": members }),
        )
        .await;
        Ok(())
    }

    pub async fn role_remove_all_members(
        &self,
        session: &Session,
        entity_id: &str,
        name: &str,
    ) -> Result<()> {
        let entity = self.authorize_manage(session, entity_id).await?;
        if builtin_role(entity.kind, name).is_some_and(|definition| definition.requires_members) {
            return Err(Error::MalformedEntity(format!(
                "built-in role {name} must keep at least one member"
            )));
        }
        self.store.role_remove_all_members(entity_id, name).await?;
        self.publish(
            EventOperation::RoleMembersRemove,
            &entity,
            json!({ "name": name, "all": true }),
        )
        .await;
        Ok(())
    }

    pub async fn role_list_actions(
        &self,
        session: &Session,
        entity_id: &str,
        name: &str,
    ) -> Result<Vec<String>> {
        self.authorize_read(session, entity_id).await?;
        self.store.role_list_actions(entity_id, name).await
    }

    pub async fn role_list_members(
        &self,
        session: &Session,
        entity_id: &str,
        name: &str,
        offset: u64,
        limit: u64,
    ) -> Result<RoleMembersPage> {
        self.authorize_read(session, entity_id).await?;
        self.store
            .role_list_members(entity_id, name, offset, clamp_limit(limit))
            .await
    }

    pub async fn role_check_actions_exists(
        &self,
        session: &Session,
        entity_id: &str,
        name: &str,
        actions: Vec<String>,
    ) -> Result<bool> {
        self.authorize_read(session, entity_id).await?;
        self.store
            .role_check_actions_exists(entity_id, name, &actions)
            .await
    }

    pub async fn role_check_members_exists(
        &self,
        session: &Session,
        entity_id: &str,
        name: &str,
        members: Vec<String>,
    ) -> Result<bool> {
        self.authorize_read(session, entity_id).await?;
        self.store
            .role_check_members_exists(entity_id, name, &members)
            .await
    }

    async fn authorize_read(&self, session: &Session, entity_id: &str) -> Result<EntityInfo> {
        let subject = session.require_subject()?;
        self.evaluator
            .authorize(&session.domain_id, subject, entity_id, Action::Read)
            .await?;
        self.store.retrieve_entity(entity_id).await
    }

    /// `manage_role` on the entity, or the delegated action on its domain.
    async fn authorize_manage(&self, session: &Session, entity_id: &str) -> Result<EntityInfo> {
        let subject = session.require_subject()?;
        let direct = self
            .evaluator
            .authorize(&session.domain_id, subject, entity_id, Action::ManageRole)
            .await;
        match direct {
            Ok(()) => {}
            Err(Error::Authorization(reason)) => {
                let entity = self.store.retrieve_entity(entity_id).await?;
                if entity.kind == EntityKind::Domain {
                    return Err(Error::Authorization(reason));
                }
                self.evaluator
                    .authorize(
                        &session.domain_id,
                        subject,
                        &entity.domain_id,
                        entity.kind.domain_manage_role_action(),
                    )
                    .await?;
            }
            Err(err) => return Err(err),
        }
        self.store.retrieve_entity(entity_id).await
    }

    async fn publish(&self, operation: EventOperation, entity: &EntityInfo, attributes: serde_json::Value) {
        self.events
            .publish(operation, &entity.id, &entity.domain_id, attributes)
            .await;
    }
}

fn is_mandatory(definition: &BuiltInRole, action: &str) -> bool {
    action
        .parse::<Action>()
        .is_ok_and(|action| definition.is_mandatory(action))
}

fn validate_role_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.len() > 254 {
        return Err(Error::MalformedEntity(
            "role name must be 1..=254 bytes".to_string(),
        ));
    }
    Ok(())
}

fn validate_actions(kind: EntityKind, actions: &[String]) -> Result<Vec<String>> {
    actions
        .iter()
        .map(|action| {
            kind.parse_action(action)
                .map(|parsed| parsed.as_str().to_string())
                .map_err(Error::from)
        })
        .collect()
}

fn validate_members(members: &[String]) -> Result<()> {
    if members.iter().any(|member| member.trim().is_empty()) {
        return Err(Error::MalformedEntity("role member ids must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::service::testing::Fixture;
    use arbiter_authz::{ADMIN_ROLE, MEMBERSHIP_ROLE};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn provisioning_seeds_the_creator_only_where_defined() {
        let roles = provision_builtin_roles(EntityKind::Domain, "d1", "alice");
        assert_eq!(roles.len(), 2);
        let admin = roles.iter().find(|r| r.name == ADMIN_ROLE).expect("admin");
        assert!(admin.members.contains("alice"));
        assert!(admin.built_in);
        assert_eq!(admin.actions.len(), EntityKind::Domain.actions().len());
        let membership = roles
            .iter()
            .find(|r| r.name == MEMBERSHIP_ROLE)
            .expect("membership");
        assert!(membership.members.is_empty());
    }

    #[test]
    fn available_actions_follow_the_kind_catalogue() {
        let actions = list_available_actions(EntityKind::Thing);
        assert!(actions.contains(&"connect_to_channel".to_string()));
        assert!(!actions.contains(&"publish".to_string()));
    }

    #[tokio::test]
    async fn custom_roles_can_be_managed_by_the_entity_admin() {
        let fx = Fixture::new().await;
        let owner = fx.owner();
        let role = fx
            .roles
            .add_role(&owner, "c1", "readers", strings(&["subscribe"]), strings(&["bob"]))
            .await
            .expect("add");
        assert!(!role.built_in);

        let actions = fx
            .roles
            .role_add_actions(&owner, "c1", "readers", strings(&["publish"]))
            .await
            .expect("add actions");
        assert_eq!(actions, strings(&["publish", "subscribe"]));

        let renamed = fx
            .roles
            .update_role_name(&owner, "c1", "readers", "operators")
            .await
            .expect("rename");
        assert_eq!(renamed.name, "operators");
        assert!(
            fx.roles
                .role_check_members_exists(&owner, "c1", "operators", strings(&["bob"]))
                .await
                .expect("check")
        );

        fx.roles
            .remove_role(&owner, "c1", "operators")
            .await
            .expect("remove");
        let page = fx
            .roles
            .retrieve_all_roles(&owner, "c1", 0, 0)
            .await
            .expect("list");
        assert_eq!(page.roles.len(), 1);
        assert_eq!(page.roles[0].name, ADMIN_ROLE);
    }

    #[tokio::test]
    async fn builtin_roles_are_protected() {
        let fx = Fixture::new().await;
        let owner = fx.owner();

        let err = fx
            .roles
            .add_role(&owner, "c1", ADMIN_ROLE, Vec::new(), Vec::new())
            .await
            .expect_err("reserved");
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = fx
            .roles
            .remove_role(&owner, "c1", ADMIN_ROLE)
            .await
            .expect_err("cannot delete");
        assert_eq!(err.kind(), ErrorKind::MalformedEntity);

        let err = fx
            .roles
            .update_role_name(&owner, "c1", ADMIN_ROLE, "root")
            .await
            .expect_err("cannot rename");
        assert_eq!(err.kind(), ErrorKind::MalformedEntity);

        let err = fx
            .roles
            .role_remove_actions(&owner, "c1", ADMIN_ROLE, strings(&["publish"]))
            .await
            .expect_err("mandatory");
        assert_eq!(err.kind(), ErrorKind::MalformedEntity);

        let err = fx
            .roles
            .role_remove_all_members(&owner, "c1", ADMIN_ROLE)
            .await
            .expect_err("admin keeps members");
        assert_eq!(err.kind(), ErrorKind::MalformedEntity);

        let err = fx
            .roles
            .role_remove_members(&owner, "c1", ADMIN_ROLE, strings(&[Fixture::OWNER]))
            .await
            .expect_err("last admin");
        assert_eq!(err.kind(), ErrorKind::MalformedEntity);
    }

    #[tokio::test]
    async fn last_admin_can_leave_once_replaced() {
        let fx = Fixture::new().await;
        let owner = fx.owner();
        fx.roles
            .role_add_members(&owner, "c1", ADMIN_ROLE, strings(&["heir"]))
            .await
            .expect("add");
        fx.roles
            .role_remove_members(&owner, "c1", ADMIN_ROLE, strings(&[Fixture::OWNER]))
            .await
            .expect("remove");
        let page = fx
            .roles
            .role_list_members(&owner, "c1", ADMIN_ROLE, 0, 10)
            .await
            .expect("list");
        assert_eq!(page.members, strings(&["heir"]));
    }

    #[tokio::test]
    async fn role_management_can_be_delegated_through_the_domain() {
        let fx = Fixture::new().await;
        let delegate = Session::new("delegate", "d1");
        let err = fx
            .roles
            .add_role(&delegate, "c1", "viewers", strings(&["read"]), Vec::new())
            .await
            .expect_err("no grant yet");
        assert_eq!(err.kind(), ErrorKind::Authorization);

        fx.roles
            .add_role(
                &fx.owner(),
                "d1",
                "channel_managers",
                strings(&["channel_manage_role"]),
                strings(&["delegate"]),
            )
            .await
            .expect("domain role");
        fx.roles
            .add_role(&delegate, "c1", "viewers", strings(&["read"]), Vec::new())
            .await
            .expect("delegated");
    }

    #[tokio::test]
    async fn actions_outside_the_catalogue_are_rejected() {
        let fx = Fixture::new().await;
        let err = fx
            .roles
            .add_role(&fx.owner(), "t1", "bad", strings(&["publish"]), Vec::new())
            .await
            .expect_err("publish is not a thing action");
        assert!(matches!(err, Error::MalformedPolicyAct(_)));
    }

    #[tokio::test]
    async fn mutations_publish_events() {
        let fx = Fixture::new().await;
        let since = fx.events.changes(0).await.next_seq;
        fx.roles
            .add_role(&fx.owner(), "c1", "readers", Vec::new(), Vec::new())
            .await
            .expect("add");
        let page = fx.events.changes(since).await;
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].operation, EventOperation::RoleAdd);
        assert_eq!(page.items[0].domain_id, "d1");
    }
}
