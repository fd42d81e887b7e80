//! Group hierarchy service.
//!
//! # Purpose
//! Authorizes and records group creation, updates, deletion, hierarchy walks
//! and memberships on top of the [`GroupRepository`] half of the store.
//!
//! # Key invariants
//! - Roots need `group_create` on the session domain; children need
//!   `set_child` on their parent.
//! - Every new group is stored together with its built-in `admin` role, whose
//!   only member is the creator.
//! - Walks and member listings need `read` on the named group; memberships of
//!   an arbitrary member need `read` on the domain.
//!
//! [`GroupRepository`]: crate::store::GroupRepository
use crate::authz::Evaluator;
use crate::errors::Result;
use crate::events::{EventLog, EventOperation};
use crate::model::{Group, GroupsPage, HierarchyQuery, MembersPage, Membership, Metadata};
use crate::service::{Session, clamp_limit, provision_builtin_roles};
use crate::store::ControlPlaneStore;
use arbiter_authz::{Action, EntityKind};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct GroupService {
    store: Arc<dyn ControlPlaneStore>,
    evaluator: Arc<Evaluator>,
    events: Arc<EventLog>,
}

impl GroupService {
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

    /// Creates a group owned by the caller. An empty id is replaced with a
    /// generated one.
    pub async fn create_group(&self, session: &Session, mut group: Group) -> Result<Group> {
        let subject = session.require_subject()?.to_string();
        match &group.parent_id {
            None => {
                self.evaluator
                    .authorize(
                        &session.domain_id,
                        &subject,
                        &session.domain_id,
                        Action::GroupCreate,
                    )
                    .await?
            }
            Some(parent_id) => {
                self.evaluator
                    .authorize(&session.domain_id, &subject, parent_id, Action::SetChild)
                    .await?
            }
        }
        if group.id.is_empty() {
            group.id = Uuid::new_v4().simple().to_string();
        }
        group.domain_id = session.domain_id.clone();
        group.owner_id = subject.clone();
        group.created_at = Utc::now();
        group.updated_at = None;

        let roles = provision_builtin_roles(EntityKind::Group, &group.id, &subject);
        let saved = self.store.save_group_with_roles(group, roles).await?;
        self.events
            .publish(
                EventOperation::GroupCreate,
                &saved.id,
                &saved.domain_id,
                json!({ "parent_id": saved.parent_id, "path": saved.path }),
            )
            .await;
        Ok(saved)
    }

    pub async fn view_group(&self, session: &Session, id: &str) -> Result<Group> {
        self.authorize(session, id, Action::Read).await?;
        self.store.retrieve_group(id).await
    }

    /// Changes name, description and metadata; structural fields are kept.
    pub async fn update_group(&self, session: &Session, group: Group) -> Result<Group> {
        self.authorize(session, &group.id, Action::Update).await?;
        let mut current = self.store.retrieve_group(&group.id).await?;
        current.name = group.name;
        current.description = group.description;
        current.metadata = group.metadata;
        current.updated_at = Some(Utc::now());
        let updated = self.store.update_group(current).await?;
        self.events
            .publish(
                EventOperation::GroupUpdate,
                &updated.id,
                &updated.domain_id,
                json!({ "name": updated.name }),
            )
            .await;
        Ok(updated)
    }

    /// Deletes the group and its subtree. Fails with `GroupNotEmpty` while
    /// any group in the subtree has members.
    pub async fn delete_group(&self, session: &Session, id: &str) -> Result<()> {
        self.authorize(session, id, Action::Delete).await?;
        let group = self.store.retrieve_group(id).await?;
        self.store.delete_group(id).await?;
        self.events
            .publish(
                EventOperation::GroupRemove,
                id,
                &group.domain_id,
                json!({ "path": group.path }),
            )
            .await;
        Ok(())
    }

    /// Groups of the session domain down to `query.level`.
    pub async fn list_groups(&self, session: &Session, query: &HierarchyQuery) -> Result<Vec<Group>> {
        self.authorize(session, &session.domain_id, Action::Read)
            .await?;
        self.store
            .retrieve_all_groups(Some(&session.domain_id), query)
            .await
    }

    pub async fn list_parents(
        &self,
        session: &Session,
        id: &str,
        query: &HierarchyQuery,
    ) -> Result<Vec<Group>> {
        self.authorize(session, id, Action::Read).await?;
        self.store.retrieve_all_parents(id, query).await
    }

    pub async fn list_children(
        &self,
        session: &Session,
        id: &str,
        query: &HierarchyQuery,
    ) -> Result<Vec<Group>> {
        self.authorize(session, id, Action::Read).await?;
        self.store.retrieve_all_children(id, query).await
    }

    pub async fn members(
        &self,
        session: &Session,
        group_id: &str,
        offset: u64,
        limit: u64,
        metadata: Option<&Metadata>,
    ) -> Result<MembersPage> {
        self.authorize(session, group_id, Action::Read).await?;
        self.store
            .members(group_id, offset, clamp_limit(limit), metadata)
            .await
    }

    pub async fn memberships(
        &self,
        session: &Session,
        member_id: &str,
        offset: u64,
        limit: u64,
        metadata: Option<&Metadata>,
    ) -> Result<GroupsPage> {
        self.authorize(session, &session.domain_id, Action::Read)
            .await?;
        self.store
            .memberships(
                member_id,
                Some(&session.domain_id),
                offset,
                clamp_limit(limit),
                metadata,
            )
            .await
    }

    pub async fn assign(
        &self,
        session: &Session,
        group_id: &str,
        member_id: &str,
    ) -> Result<Membership> {
        self.authorize(session, group_id, Action::ManageMembers)
            .await?;
        let membership = self.store.assign(member_id, group_id).await?;
        self.events
            .publish(
                EventOperation::GroupAssign,
                group_id,
                &session.domain_id,
                json!({ "member_id": member_id }),
            )
            .await;
        Ok(membership)
    }

    pub async fn unassign(&self, session: &Session, group_id: &str, member_id: &str) -> Result<()> {
        self.authorize(session, group_id, Action::ManageMembers)
            .await?;
        self.store.unassign(member_id, group_id).await?;
        self.events
            .publish(
                EventOperation::GroupUnassign,
                group_id,
                &session.domain_id,
                json!({ "member_id": member_id }),
            )
            .await;
        Ok(())
    }

    async fn authorize(&self, session: &Session, object: &str, action: Action) -> Result<()> {
        let subject = session.require_subject()?;
        self.evaluator
            .authorize(&session.domain_id, subject, object, action)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{Error, ErrorKind};
    use crate::service::testing::Fixture;
    use crate::store::RoleRepository;
    use arbiter_authz::ADMIN_ROLE;

    fn group(id: &str, parent: Option<&str>) -> Group {
        Group {
            id: id.to_string(),
            domain_id: String::new(),
            parent_id: parent.map(str::to_string),
            name: id.to_string(),
            description: String::new(),
            owner_id: String::new(),
            group_type: if parent.is_none() { "org".to_string() } else { String::new() },
            path: String::new(),
            level: 0,
            metadata: Metadata::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn creators_administer_their_groups() {
        let fx = Fixture::new().await;
        let owner = fx.owner();
        let root = fx
            .groups
            .create_group(&owner, group("A", None))
            .await
            .expect("root");
        assert_eq!(root.domain_id, "d1");
        assert_eq!(root.owner_id, Fixture::OWNER);

        let admin = fx
            .store
            .retrieve_role("A", ADMIN_ROLE)
            .await
            .expect("admin role seeded");
        assert!(admin.members.contains(Fixture::OWNER));

        let child = fx
            .groups
            .create_group(&owner, group("B", Some("A")))
            .await
            .expect("child");
        assert_eq!(child.path, "A.B");
        assert_eq!(child.group_type, "org");
    }

    #[tokio::test]
    async fn generated_ids_are_path_safe() {
        let fx = Fixture::new().await;
        let saved = fx
            .groups
            .create_group(&fx.owner(), group("", None))
            .await
            .expect("create");
        assert_eq!(saved.id.len(), 32);
        assert_eq!(saved.path, saved.id);
    }

    #[tokio::test]
    async fn child_creation_needs_set_child_on_the_parent() {
        let fx = Fixture::new().await;
        let owner = fx.owner();
        fx.groups
            .create_group(&owner, group("A", None))
            .await
            .expect("root");
        let outsider = Session::new("outsider", "d1");
        let err = fx
            .groups
            .create_group(&outsider, group("B", Some("A")))
            .await
            .expect_err("no set_child");
        assert_eq!(err.kind(), ErrorKind::Authorization);

        fx.roles
            .add_role(
                &owner,
                "A",
                "builders",
                vec!["set_child".to_string()],
                vec!["outsider".to_string()],
            )
            .await
            .expect("grant");
        let child = fx
            .groups
            .create_group(&outsider, group("B", Some("A")))
            .await
            .expect("allowed now");
        assert_eq!(child.owner_id, "outsider");
    }

    #[tokio::test]
    async fn roots_need_group_create_on_the_domain() {
        let fx = Fixture::new().await;
        let err = fx
            .groups
            .create_group(&Session::new("outsider", "d1"), group("A", None))
            .await
            .expect_err("denied");
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn membership_lifecycle_publishes_events() {
        let fx = Fixture::new().await;
        let owner = fx.owner();
        fx.groups
            .create_group(&owner, group("A", None))
            .await
            .expect("root");
        let since = fx.events.changes(0).await.next_seq;

        fx.groups.assign(&owner, "A", "t1").await.expect("assign");
        let err = fx
            .groups
            .assign(&owner, "A", "t1")
            .await
            .expect_err("duplicate");
        assert!(matches!(err, Error::MemberAlreadyAssigned { .. }));

        let page = fx
            .groups
            .members(&owner, "A", 0, 0, None)
            .await
            .expect("members");
        assert_eq!(page.total, 1);
        let page = fx
            .groups
            .memberships(&owner, "t1", 0, 0, None)
            .await
            .expect("memberships");
        assert_eq!(page.groups[0].id, "A");

        let err = fx
            .groups
            .delete_group(&owner, "A")
            .await
            .expect_err("not empty");
        assert_eq!(err.kind(), ErrorKind::GroupNotEmpty);

        fx.groups.unassign(&owner, "A", "t1").await.expect("unassign");
        fx.groups.delete_group(&owner, "A").await.expect("delete");

        let ops: Vec<_> = fx
            .events
            .changes(since)
            .await
            .items
            .into_iter()
            .map(|event| event.operation)
            .collect();
        assert_eq!(
            ops,
            vec![
                EventOperation::GroupAssign,
                EventOperation::GroupUnassign,
                EventOperation::GroupRemove
            ]
        );
    }

    #[tokio::test]
    async fn walks_are_bounded_and_exclude_the_named_group() {
        let fx = Fixture::new().await;
        let owner = fx.owner();
        for (id, parent) in [("A", None), ("B", Some("A")), ("C", Some("B"))] {
            fx.groups
                .create_group(&owner, group(id, parent))
                .await
                .expect("create");
        }
        let children = fx
            .groups
            .list_children(&owner, "A", &HierarchyQuery::new(1))
            .await
            .expect("children");
        let ids: Vec<_> = children.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["B"]);

        let parents = fx
            .groups
            .list_parents(&owner, "C", &HierarchyQuery::new(5))
            .await
            .expect("parents");
        let ids: Vec<_> = parents.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);

        let all = fx
            .groups
            .list_groups(&owner, &HierarchyQuery::new(5))
            .await
            .expect("all");
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn updates_keep_structure() {
        let fx = Fixture::new().await;
        let owner = fx.owner();
        fx.groups
            .create_group(&owner, group("A", None))
            .await
            .expect("root");
        let mut change = group("A", None);
        change.name = "Renamed".to_string();
        change.group_type = "site".to_string();
        let updated = fx
            .groups
            .update_group(&owner, change)
            .await
            .expect("update");
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.group_type, "org");
        let viewed = fx.groups.view_group(&owner, "A").await.expect("view");
        assert_eq!(viewed, updated);
    }
}
