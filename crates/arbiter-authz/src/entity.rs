use crate::{Action, AuthzError, AuthzResult};
use serde::{Deserialize, Serialize};

/// Kinds of entity that carry roles and policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Domain,
    Group,
    Thing,
    Channel,
}

const DOMAIN_ACTIONS: &[Action] = &[
    Action::Read,
    Action::Update,
    Action::Delete,
    Action::Membership,
    Action::ManageRole,
    Action::GroupCreate,
    Action::ThingCreate,
    Action::ChannelCreate,
    Action::GroupManageRole,
    Action::ThingManageRole,
    Action::ChannelManageRole,
];

const GROUP_ACTIONS: &[Action] = &[
    Action::Read,
    Action::Update,
    Action::Delete,
    Action::SetChild,
    Action::ManageMembers,
    Action::ManageRole,
];

const THING_ACTIONS: &[Action] = &[
    Action::Read,
    Action::Update,
    Action::Delete,
    Action::ManageRole,
    Action::ConnectToChannel,
];

const CHANNEL_ACTIONS: &[Action] = &[
    Action::Read,
    Action::Update,
    Action::Delete,
    Action::ManageRole,
    Action::ConnectToThing,
    Action::Publish,
    Action::Subscribe,
];

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Domain => "domain",
            EntityKind::Group => "group",
            EntityKind::Thing => "thing",
            EntityKind::Channel => "channel",
        }
    }

    /// Action catalogue of this kind, in declaration order.
    pub fn actions(self) -> &'static [Action] {
        match self {
            EntityKind::Domain => DOMAIN_ACTIONS,
            EntityKind::Group => GROUP_ACTIONS,
            EntityKind::Thing => THING_ACTIONS,
            EntityKind::Channel => CHANNEL_ACTIONS,
        }
    }

    pub fn supports(self, action: Action) -> bool {
        self.actions().contains(&action)
    }

    /// Parses `action` and checks it against this kind's catalogue.
    pub fn parse_action(self, action: &str) -> AuthzResult<Action> {
        let parsed: Action = action.parse()?;
        if !self.supports(parsed) {
            return Err(AuthzError::UnsupportedAction {
                kind: self.as_str(),
                action: action.to_string(),
            });
        }
        Ok(parsed)
    }

    /// Domain-level action that delegates role management for entities of
    /// this kind. Domains manage their own roles with `manage_role`.
    pub fn domain_manage_role_action(self) -> Action {
        match self {
            EntityKind::Domain => Action::ManageRole,
            EntityKind::Group => Action::GroupManageRole,
            EntityKind::Thing => Action::ThingManageRole,
            EntityKind::Channel => Action::ChannelManageRole,
        }
    }

    /// Domain-level action required to create an entity of this kind.
    pub fn create_action(self) -> Option<Action> {
        match self {
            EntityKind::Domain => None,
            EntityKind::Group => Some(Action::GroupCreate),
            EntityKind::Thing => Some(Action::ThingCreate),
            EntityKind::Channel => Some(Action::ChannelCreate),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "domain" => Ok(EntityKind::Domain),
            "group" => Ok(EntityKind::Group),
            "thing" => Ok(EntityKind::Thing),
            "channel" => Ok(EntityKind::Channel),
            other => Err(AuthzError::UnknownEntityKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_and_subscribe_only_apply_to_channels() {
        for kind in [EntityKind::Domain, EntityKind::Group, EntityKind::Thing] {
            assert!(!kind.supports(Action::Publish));
            assert!(!kind.supports(Action::Subscribe));
        }
        assert!(EntityKind::Channel.supports(Action::Publish));
        assert!(EntityKind::Channel.supports(Action::Subscribe));
    }

    #[test]
    fn every_kind_can_be_read_and_manage_roles() {
        for kind in [
            EntityKind::Domain,
            EntityKind::Group,
            EntityKind::Thing,
            EntityKind::Channel,
        ] {
            assert!(kind.supports(Action::Read));
            assert!(kind.supports(Action::ManageRole));
        }
    }

    #[test]
    fn parse_action_rejects_actions_outside_the_catalogue() {
        let err = EntityKind::Group
            .parse_action("publish")
            .expect_err("publish is a channel action");
        assert!(matches!(err, AuthzError::UnsupportedAction { kind: "group", .. }));

        let err = EntityKind::Group
            .parse_action("fly")
            .expect_err("unknown action");
        assert!(matches!(err, AuthzError::InvalidAction(_)));

        assert_eq!(
            EntityKind::Group.parse_action("set_child").expect("valid"),
            Action::SetChild
        );
    }

    #[test]
    fn delegated_role_management_actions_live_on_domains() {
        for kind in [EntityKind::Group, EntityKind::Thing, EntityKind::Channel] {
            assert!(EntityKind::Domain.supports(kind.domain_manage_role_action()));
            let create = kind.create_action().expect("creatable inside a domain");
            assert!(EntityKind::Domain.supports(create));
        }
        assert_eq!(EntityKind::Domain.create_action(), None);
    }

    #[test]
    fn kind_names_parse() {
        assert_eq!("thing".parse::<EntityKind>().ok(), Some(EntityKind::Thing));
        assert!("tenant".parse::<EntityKind>().is_err());
    }
}
