use crate::{Action, AuthzError};
use serde::{Deserialize, Serialize};

/// Permission a thing asks for on a channel through the authorization RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPermission {
    Publish,
    Subscribe,
}

impl ChannelPermission {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelPermission::Publish => "publish",
            ChannelPermission::Subscribe => "subscribe",
        }
    }

    pub fn action(self) -> Action {
        match self {
            ChannelPermission::Publish => Action::Publish,
            ChannelPermission::Subscribe => Action::Subscribe,
        }
    }
}

impl std::fmt::Display for ChannelPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelPermission {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "publish" => Ok(ChannelPermission::Publish),
            "subscribe" => Ok(ChannelPermission::Subscribe),
            other => Err(AuthzError::InvalidPermission(other.to_string())),
        }
    }
}
