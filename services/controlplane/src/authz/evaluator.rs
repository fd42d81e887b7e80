//! Policy/relation evaluator.
//!
//! # Purpose
//! Answers "may `subject` perform every one of `actions` on `object` inside
//! `domain`?" for the admin services and the authorization gateway.
//!
//! # Resolution order
//! The object is resolved to an [`EntityInfo`] once, then each action runs
//! through a [`CapabilityChain`]:
//! 1. `platform_admin`: configured platform administrators are allowed.
//! 2. `domain_boundary`: objects outside the session domain are denied.
//! 3. `domain_admin`: members of the domain's `admin` role are allowed.
//! 4. `ownership`: the object's recorded owner is allowed.
//! 5. `explicit_grant`: a policy on the object, or a role on the object that
//!    lists the subject, carries the action.
//! 6. `inherited_grant`: the same test against the ancestor groups of a group
//!    object, or the groups (and their ancestors) a thing or channel is in.
//!
//! An exhausted chain denies. All actions must be allowed; a request is never
//! partially granted.
use crate::authz::enforcer::{build_enforcer, rules_for};
use crate::errors::{Error, Result};
use crate::model::{EntityInfo, HierarchyQuery, MAX_PAGE_LIMIT, Policy};
use crate::store::ControlPlaneStore;
use arbiter_authz::{
    ADMIN_ROLE, Action, Capability, CapabilityChain, Decision, EntityKind,
};
use async_trait::async_trait;
use casbin::CoreApi;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Facts resolved once per evaluation and shared by every capability.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub domain_id: String,
    pub subject: String,
    pub object: EntityInfo,
}

pub struct Evaluator {
    store: Arc<dyn ControlPlaneStore>,
    chain: CapabilityChain<EvalContext, Error>,
}

impl Evaluator {
    pub fn new<I>(store: Arc<dyn ControlPlaneStore>, platform_admins: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let chain = CapabilityChain::new()
            .with(PlatformAdmin {
                admins: platform_admins.into_iter().collect(),
            })
            .with(DomainBoundary)
            .with(DomainAdmin {
                store: store.clone(),
            })
            .with(Ownership)
            .with(ExplicitGrant {
                store: store.clone(),
            })
            .with(InheritedGrant {
                store: store.clone(),
            });
        Self { store, chain }
    }

    pub fn capability_names(&self) -> Vec<&'static str> {
        self.chain.names()
    }

    /// Succeeds when `policy.subject` holds every action of `policy` on
    /// `policy.object`; fails with `Authorization` otherwise.
    ///
    /// Unknown objects are reported as `Authorization`, not `NotFound`.
    pub async fn evaluate(&self, domain_id: &str, policy: &Policy) -> Result<()> {
        if policy.subject.is_empty() {
            return Err(Error::MissingPolicySub);
        }
        if policy.object.is_empty() {
            return Err(Error::MissingPolicyObj);
        }
        if policy.actions.is_empty() {
            return Err(Error::MalformedPolicyAct("no actions requested".to_string()));
        }
        let object = self.resolve_object(&policy.object).await?;
        let actions = policy
            .actions
            .iter()
            .map(|action| object.kind.parse_action(action))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.decide(domain_id, &policy.subject, object, &actions)
            .await
    }

    /// Single-action form of [`Evaluator::evaluate`] used by the services.
    pub async fn authorize(
        &self,
        domain_id: &str,
        subject: &str,
        object: &str,
        action: Action,
    ) -> Result<()> {
        if subject.is_empty() {
            return Err(Error::Authentication("missing subject".to_string()));
        }
        let object = self.resolve_object(object).await?;
        if !object.kind.supports(action) {
            return Err(Error::MalformedPolicyAct(format!(
                "{action} is not an action of {}",
                object.kind
            )));
        }
        self.decide(domain_id, subject, object, &[action]).await
    }

    /// Like [`Evaluator::evaluate`] but reports a denial as `Ok(false)`.
    pub async fn check(&self, domain_id: &str, policy: &Policy) -> Result<bool> {
        match self.evaluate(domain_id, policy).await {
            Ok(()) => Ok(true),
            Err(Error::Authorization(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn resolve_object(&self, object: &str) -> Result<EntityInfo> {
        match self.store.retrieve_entity(object).await {
            Ok(info) => Ok(info),
            Err(Error::NotFound(_)) => Err(Error::Authorization(format!(
                "access to {object} denied"
            ))),
            Err(err) => Err(err),
        }
    }

    async fn decide(
        &self,
        domain_id: &str,
        subject: &str,
        object: EntityInfo,
        actions: &[Action],
    ) -> Result<()> {
        let ctx = EvalContext {
            domain_id: domain_id.to_string(),
            subject: subject.to_string(),
            object,
        };
        match self.chain.first_denied(&ctx, actions).await? {
            None => {
                metrics::counter!("arbiter_access_decisions_total", "decision" => "allow")
                    .increment(1);
                Ok(())
            }
            Some((action, verdict)) => {
                metrics::counter!("arbiter_access_decisions_total", "decision" => "deny")
                    .increment(1);
                tracing::debug!(
                    subject = %ctx.subject,
                    object = %ctx.object.id,
                    domain = %ctx.domain_id,
                    %action,
                    decided_by = verdict.decided_by.unwrap_or("exhausted"),
                    "access denied"
                );
                Err(Error::Authorization(format!(
                    "{} may not {action} on {}",
                    ctx.subject, ctx.object.id
                )))
            }
        }
    }
}

/// True when a policy or role on any of `objects` grants `action` to the
/// context subject.
async fn granted_on(
    store: &dyn ControlPlaneStore,
    ctx: &EvalContext,
    objects: &[String],
    action: Action,
) -> Result<bool> {
    if objects.is_empty() {
        return Ok(false);
    }
    let policies = store.subject_policies(&ctx.subject, objects).await?;
    let roles = store.member_roles(objects, &ctx.subject).await?;
    if policies.is_empty() && roles.is_empty() {
        return Ok(false);
    }
    let (rules, groupings) = rules_for(&ctx.subject, &policies, &roles);
    let enforcer = build_enforcer(&rules, &groupings, &ctx.domain_id)
        .await
        .map_err(Error::view)?;
    for object in objects {
        let allowed = enforcer
            .enforce((
                ctx.subject.as_str(),
                ctx.domain_id.as_str(),
                object.as_str(),
                action.as_str(),
            ))
            .map_err(Error::view)?;
        if allowed {
            return Ok(true);
        }
    }
    Ok(false)
}

fn allow_if(condition: bool) -> Decision {
    if condition {
        Decision::Allow
    } else {
        Decision::Abstain
    }
}

struct PlatformAdmin {
    admins: HashSet<String>,
}

#[async_trait]
impl Capability<EvalContext, Error> for PlatformAdmin {
    fn name(&self) -> &'static str {
        "platform_admin"
    }

    async fn decide(&self, ctx: &EvalContext, _action: Action) -> Result<Decision> {
        Ok(allow_if(self.admins.contains(&ctx.subject)))
    }
}

struct DomainBoundary;

#[async_trait]
impl Capability<EvalContext, Error> for DomainBoundary {
    fn name(&self) -> &'static str {
        "domain_boundary"
    }

    async fn decide(&self, ctx: &EvalContext, _action: Action) -> Result<Decision> {
        if ctx.object.domain_id != ctx.domain_id {
            return Ok(Decision::Deny);
        }
        Ok(Decision::Abstain)
    }
}

struct DomainAdmin {
    store: Arc<dyn ControlPlaneStore>,
}

#[async_trait]
impl Capability<EvalContext, Error> for DomainAdmin {
    fn name(&self) -> &'static str {
        "domain_admin"
    }

    async fn decide(&self, ctx: &EvalContext, _action: Action) -> Result<Decision> {
        let roles = self
            .store
            .member_roles(&[ctx.domain_id.clone()], &ctx.subject)
            .await?;
        Ok(allow_if(roles.iter().any(|role| role.name == ADMIN_ROLE)))
    }
}

struct Ownership;

#[async_trait]
impl Capability<EvalContext, Error> for Ownership {
    fn name(&self) -> &'static str {
        "ownership"
    }

    async fn decide(&self, ctx: &EvalContext, _action: Action) -> Result<Decision> {
        Ok(allow_if(
            !ctx.object.owner_id.is_empty() && ctx.object.owner_id == ctx.subject,
        ))
    }
}

struct ExplicitGrant {
    store: Arc<dyn ControlPlaneStore>,
}

#[async_trait]
impl Capability<EvalContext, Error> for ExplicitGrant {
    fn name(&self) -> &'static str {
        "explicit_grant"
    }

    async fn decide(&self, ctx: &EvalContext, action: Action) -> Result<Decision> {
        let objects = [ctx.object.id.clone()];
        Ok(allow_if(
            granted_on(self.store.as_ref(), ctx, &objects, action).await?,
        ))
    }
}

struct InheritedGrant {
    store: Arc<dyn ControlPlaneStore>,
}

impl InheritedGrant {
    /// Groups whose grants flow down to the context object.
    async fn sources(&self, ctx: &EvalContext) -> Result<Vec<String>> {
        let unbounded = HierarchyQuery::new(u64::MAX);
        let mut sources = BTreeSet::new();
        match ctx.object.kind {
            EntityKind::Domain => {}
            EntityKind::Group => {
                for group in self
                    .store
                    .retrieve_all_parents(&ctx.object.id, &unbounded)
                    .await?
                {
                    sources.insert(group.id);
                }
            }
            EntityKind::Thing | EntityKind::Channel => {
                let mut offset = 0;
                loop {
                    let page = self
                        .store
                        .memberships(
                            &ctx.object.id,
                            Some(&ctx.domain_id),
                            offset,
                            MAX_PAGE_LIMIT,
                            None,
                        )
                        .await?;
                    let fetched = page.groups.len() as u64;
                    for group in page.groups {
                        // Ancestors of a group already collected are collected too.
                        if !sources.insert(group.id.clone()) {
                            continue;
                        }
                        for parent in self
                            .store
                            .retrieve_all_parents(&group.id, &unbounded)
                            .await?
                        {
                            sources.insert(parent.id);
                        }
                    }
                    offset += fetched;
                    if fetched == 0 || offset >= page.total {
                        break;
                    }
                }
            }
        }
        Ok(sources.into_iter().collect())
    }
}

#[async_trait]
impl Capability<EvalContext, Error> for InheritedGrant {
    fn name(&self) -> &'static str {
        "inherited_grant"
    }

    async fn decide(&self, ctx: &EvalContext, action: Action) -> Result<Decision> {
        let sources = self.sources(ctx).await?;
        Ok(allow_if(
            granted_on(self.store.as_ref(), ctx, &sources, action).await?,
        ))
    }
}
