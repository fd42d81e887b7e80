//! Direct policies and access evaluation.
use crate::authz::Evaluator;
use crate::errors::{Error, Result};
use crate::events::{EventLog, EventOperation};
use crate::model::{EntityInfo, Policy, PolicyFilter, PolicyPage};
use crate::service::{Session, clamp_limit};
use crate::store::ControlPlaneStore;
use arbiter_authz::Action;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct PolicyService {
    store: Arc<dyn ControlPlaneStore>,
    evaluator: Arc<Evaluator>,
    events: Arc<EventLog>,
}

impl PolicyService {
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

    /// Stores a new policy; a second policy for the same (subject, object)
    /// pair fails with `Conflict`.
    pub async fn add_policy(&self, session: &Session, mut policy: Policy) -> Result<Policy> {
        let object = self.prepare(session, &mut policy).await?;
        policy.owner_id = session.subject.clone();
        policy.created_at = Utc::now();
        policy.updated_at = None;
        let saved = self.store.save_policy(policy).await?;
        self.publish(EventOperation::PolicyAdd, &object, &saved).await;
        Ok(saved)
    }

    /// Replaces the action set of an existing policy.
    pub async fn update_policy(&self, session: &Session, mut policy: Policy) -> Result<Policy> {
        let object = self.prepare(session, &mut policy).await?;
        policy.updated_at = Some(Utc::now());
        let saved = self.store.update_policy(policy).await?;
        self.publish(EventOperation::PolicyUpdate, &object, &saved)
            .await;
        Ok(saved)
    }

    pub async fn delete_policy(&self, session: &Session, subject: &str, object: &str) -> Result<()> {
        if subject.is_empty() {
            return Err(Error::MissingPolicySub);
        }
        if object.is_empty() {
            return Err(Error::MissingPolicyObj);
        }
        let caller = session.require_subject()?;
        self.evaluator
            .authorize(&session.domain_id, caller, object, Action::ManageRole)
            .await?;
        let target = self.store.retrieve_entity(object).await?;
        self.store.delete_policy(subject, object).await?;
        self.events
            .publish(
                EventOperation::PolicyDelete,
                object,
                &target.domain_id,
                json!({ "subject": subject }),
            )
            .await;
        Ok(())
    }

    pub async fn retrieve_policy(
        &self,
        session: &Session,
        subject: &str,
        object: &str,
    ) -> Result<Policy> {
        let caller = session.require_subject()?;
        self.evaluator
            .authorize(&session.domain_id, caller, object, Action::Read)
            .await?;
        self.store.retrieve_policy(subject, object).await
    }

    /// Policies on objects of the session domain matching `filter`.
    pub async fn list_policies(
        &self,
        session: &Session,
        mut filter: PolicyFilter,
        offset: u64,
        limit: u64,
    ) -> Result<PolicyPage> {
        let caller = session.require_subject()?;
        self.evaluator
            .authorize(&session.domain_id, caller, &session.domain_id, Action::Read)
            .await?;
        filter.domain_id = Some(session.domain_id.clone());
        self.store
            .list_policies(&filter, offset, clamp_limit(limit))
            .await
    }

    /// Succeeds when `policy.subject` may perform every requested action on
    /// `policy.object` inside the session domain.
    pub async fn evaluate(&self, session: &Session, policy: &Policy) -> Result<()> {
        session.require_subject()?;
        self.evaluator.evaluate(&session.domain_id, policy).await
    }

    /// Validates the policy against its object and authorizes the caller.
    async fn prepare(&self, session: &Session, policy: &mut Policy) -> Result<EntityInfo> {
        if policy.subject.is_empty() {
            return Err(Error::MissingPolicySub);
        }
        if policy.object.is_empty() {
            return Err(Error::MissingPolicyObj);
        }
        if policy.actions.is_empty() {
            return Err(Error::MalformedPolicyAct("no actions given".to_string()));
        }
        let caller = session.require_subject()?;
        self.evaluator
            .authorize(&session.domain_id, caller, &policy.object, Action::ManageRole)
            .await?;
        let object = self.store.retrieve_entity(&policy.object).await?;
        for action in &policy.actions {
            object.kind.parse_action(action)?;
        }
        policy.domain_id = object.domain_id.clone();
        Ok(object)
    }

    async fn publish(&self, operation: EventOperation, object: &EntityInfo, policy: &Policy) {
        self.events
            .publish(
                operation,
                &object.id,
                &object.domain_id,
                json!({ "subject": policy.subject, "actions": policy.actions }),
            )
            .await;
    }
}
