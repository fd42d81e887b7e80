use serde::{Deserialize, Serialize};

/// Every action an Arbiter entity can be acted upon with.
///
/// Which actions apply to which entity is decided by
/// [`EntityKind::actions`](crate::EntityKind::actions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Update,
    Delete,
    Membership,
    ManageRole,
    ManageMembers,
    SetChild,
    GroupCreate,
    ThingCreate,
    ChannelCreate,
    GroupManageRole,
    ThingManageRole,
    ChannelManageRole,
    ConnectToChannel,
    ConnectToThing,
    Publish,
    Subscribe,
}

impl Action {
    pub const ALL: [Action; 17] = [
        Action::Read,
        Action::Update,
        Action::Delete,
        Action::Membership,
        Action::ManageRole,
        Action::ManageMembers,
        Action::SetChild,
        Action::GroupCreate,
        Action::ThingCreate,
        Action::ChannelCreate,
        Action::GroupManageRole,
        Action::ThingManageRole,
        Action::ChannelManageRole,
        Action::ConnectToChannel,
        Action::ConnectToThing,
        Action::Publish,
        Action::Subscribe,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Membership => "membership",
            Action::ManageRole => "manage_role",
            Action::ManageMembers => "manage_members",
            Action::SetChild => "set_child",
            Action::GroupCreate => "group_create",
            Action::ThingCreate => "thing_create",
            Action::ChannelCreate => "channel_create",
            Action::GroupManageRole => "group_manage_role",
            Action::ThingManageRole => "thing_manage_role",
            Action::ChannelManageRole => "channel_manage_role",
            Action::ConnectToChannel => "connect_to_channel",
            Action::ConnectToThing => "connect_to_thing",
            Action::Publish => "publish",
            Action::Subscribe => "subscribe",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = crate::AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == value)
            .ok_or_else(|| crate::AuthzError::InvalidAction(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::Action;
    use std::str::FromStr;

    #[test]
    fn every_action_parses_from_its_name() {
        for action in Action::ALL {
            assert_eq!(Action::from_str(action.as_str()).ok(), Some(action));
            assert_eq!(action.to_string(), action.as_str());
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = Action::from_str("teleport").expect_err("unknown action");
        assert!(err.to_string().contains("teleport"));
    }
}
