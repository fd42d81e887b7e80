//! Casbin enforcer builder for domain-scoped grants.
//!
//! # Purpose and responsibility
//! Turns the stored policies and roles that concern one subject into Casbin
//! rules and builds an in-memory enforcer over them for a single decision.
//!
//! # Key invariants and assumptions
//! - The model is the one exported by `arbiter_authz::casbin_model`; objects
//!   match exactly, so hierarchy must be resolved by the caller.
//! - A role becomes a synthetic subject `role:{entity}/{name}`; its members are
//!   linked to it with grouping rules and its actions apply only to its entity.
//! - Every rule is inserted with the provided domain.
use crate::model::{Policy, Role};
use arbiter_authz::casbin_model;
use casbin::{CoreApi, Enforcer, MemoryAdapter, MgmtApi, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub subject: String,
    pub object: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingRule {
    pub member: String,
    pub role: String,
}

pub fn role_subject(entity_id: &str, name: &str) -> String {
    format!("role:{entity_id}/{name}")
}

/// Flattens policies and role grants into Casbin rules.
///
/// Roles are expected to already be filtered to those listing `subject`; only
/// that membership is linked.
pub fn rules_for(
    subject: &str,
    policies: &[Policy],
    roles: &[Role],
) -> (Vec<PolicyRule>, Vec<GroupingRule>) {
    let mut rules = Vec::new();
    let mut groupings = Vec::new();
    for policy in policies {
        for action in &policy.actions {
            rules.push(PolicyRule {
                subject: policy.subject.clone(),
                object: policy.object.clone(),
                action: action.clone(),
            });
        }
    }
    for role in roles {
        let role_sub = role_subject(&role.entity_id, &role.name);
        for action in &role.actions {
            rules.push(PolicyRule {
                subject: role_sub.clone(),
                object: role.entity_id.clone(),
                action: action.clone(),
            });
        }
        if role.members.contains(subject) {
            groupings.push(GroupingRule {
                member: subject.to_string(),
                role: role_sub,
            });
        }
    }
    (rules, groupings)
}

/// Build an in-memory Casbin enforcer for a domain.
///
/// # Errors
/// - Returns Casbin errors for an invalid model or policy insertion failures.
pub async fn build_enforcer(
    policies: &[PolicyRule],
    groupings: &[GroupingRule],
    domain: &str,
) -> Result<Enforcer> {
    let model = casbin_model().await?;
    let adapter = MemoryAdapter::default();
    let mut enforcer = Enforcer::new(model, adapter).await?;

    for policy in policies {
        enforcer
            .add_policy(vec![
                policy.subject.clone(),
                domain.to_string(),
                policy.object.clone(),
                policy.action.clone(),
            ])
            .await?;
    }

    for grouping in groupings {
        enforcer
            .add_grouping_policy(vec![
                grouping.member.clone(),
                grouping.role.clone(),
                domain.to_string(),
            ])
            .await?;
    }

    // Role links must be rebuilt once every grouping is loaded.
    enforcer.build_role_links()?;
    Ok(enforcer)
}
