//! Built-in roles seeded on every entity at creation time.
//!
//! Built-in role names are reserved: they cannot be created, renamed to,
//! renamed from, or deleted through role management. Their mandatory actions
//! always stay attached, and the `admin` role always keeps at least one
//! member.
use crate::{Action, EntityKind};

pub const ADMIN_ROLE: &str = "admin";
pub const MEMBERSHIP_ROLE: &str = "membership";

const DOMAIN_MEMBERSHIP_ACTIONS: &[Action] = &[Action::Membership, Action::Read];
const DOMAIN_MEMBERSHIP_MANDATORY: &[Action] = &[Action::Membership];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltInRole {
    pub name: &'static str,
    pub actions: &'static [Action],
    pub mandatory: &'static [Action],
    /// Whether the creator of the entity is seeded as the initial member.
    pub seed_creator: bool,
    /// Whether the role must keep at least one member.
    pub requires_members: bool,
}

impl BuiltInRole {
    pub fn is_mandatory(&self, action: Action) -> bool {
        self.mandatory.contains(&action)
    }
}

/// Built-in roles for `kind`, in seeding order.
pub fn builtin_roles(kind: EntityKind) -> Vec<BuiltInRole> {
    let admin = BuiltInRole {
        name: ADMIN_ROLE,
        actions: kind.actions(),
        mandatory: kind.actions(),
        seed_creator: true,
        requires_members: true,
    };
    match kind {
        EntityKind::Domain => vec![
            admin,
            BuiltInRole {
                name: MEMBERSHIP_ROLE,
                actions: DOMAIN_MEMBERSHIP_ACTIONS,
                mandatory: DOMAIN_MEMBERSHIP_MANDATORY,
                seed_creator: false,
                requires_members: false,
            },
        ],
        EntityKind::Group | EntityKind::Thing | EntityKind::Channel => vec![admin],
    }
}

/// Looks up the built-in role called `name` on entities of `kind`.
pub fn builtin_role(kind: EntityKind, name: &str) -> Option<BuiltInRole> {
    builtin_roles(kind).into_iter().find(|role| role.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_an_admin_role_with_the_full_catalogue() {
        for kind in [
            EntityKind::Domain,
            EntityKind::Group,
            EntityKind::Thing,
            EntityKind::Channel,
        ] {
            let admin = builtin_role(kind, ADMIN_ROLE).expect("admin role");
            assert_eq!(admin.actions, kind.actions());
            assert!(admin.seed_creator);
            assert!(admin.requires_members);
            assert!(kind.actions().iter().all(|a| admin.is_mandatory(*a)));
        }
    }

    #[test]
    fn only_domains_have_a_membership_role() {
        let membership = builtin_role(EntityKind::Domain, MEMBERSHIP_ROLE).expect("membership");
        assert!(membership.is_mandatory(Action::Membership));
        assert!(!membership.is_mandatory(Action::Read));
        assert!(!membership.seed_creator);

        assert!(builtin_role(EntityKind::Thing, MEMBERSHIP_ROLE).is_none());
        assert!(builtin_role(EntityKind::Group, MEMBERSHIP_ROLE).is_none());
    }

    #[test]
    fn builtin_actions_belong_to_the_kind_catalogue() {
        for kind in [
            EntityKind::Domain,
            EntityKind::Group,
            EntityKind::Thing,
            EntityKind::Channel,
        ] {
            for role in builtin_roles(kind) {
                assert!(role.actions.iter().all(|a| kind.supports(*a)));
                assert!(role.mandatory.iter().all(|a| role.actions.contains(a)));
            }
        }
    }
}
