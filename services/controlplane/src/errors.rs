//! Error taxonomy shared by stores, services, the gateway and the API layers.
//!
//! # Key invariants
//! - Every variant maps to exactly one [`ErrorKind`]; transport layers switch on
//!   the kind, never on the message.
//! - Wrapper variants (`CreateEntity`, `ViewEntity`, ...) carry the backend
//!   error as their source and always map to [`ErrorKind::Internal`].
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed entity: {0}")]
    MalformedEntity(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("group not found: {0}")]
    GroupNotFound(String),
    #[error("group already exists: {0}")]
    GroupConflict(String),
    #[error("member {member_id} already assigned to group {group_id}")]
    MemberAlreadyAssigned { group_id: String, member_id: String },
    #[error("group {0} still has members")]
    GroupNotEmpty(String),
    #[error("invalid group type: {0}")]
    InvalidGroupType(String),
    #[error("missing policy subject")]
    MissingPolicySub,
    #[error("missing policy object")]
    MissingPolicyObj,
    #[error("malformed policy action: {0}")]
    MalformedPolicyAct(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("authorization failed: {0}")]
    Authorization(String),
    #[error("failed to delete group {0}")]
    DeleteGroup(String),
    #[error("failed to create entity")]
    CreateEntity(#[source] anyhow::Error),
    #[error("failed to update entity")]
    UpdateEntity(#[source] anyhow::Error),
    #[error("failed to remove entity")]
    RemoveEntity(#[source] anyhow::Error),
    #[error("failed to view entity")]
    ViewEntity(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by the HTTP and gRPC layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedEntity,
    NotFound,
    Conflict,
    GroupNotEmpty,
    Authentication,
    Authorization,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedEntity(_)
            | Error::InvalidGroupType(_)
            | Error::MissingPolicySub
            | Error::MissingPolicyObj
            | Error::MalformedPolicyAct(_) => ErrorKind::MalformedEntity,
            Error::NotFound(_) | Error::GroupNotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) | Error::GroupConflict(_) | Error::MemberAlreadyAssigned { .. } => {
                ErrorKind::Conflict
            }
            Error::GroupNotEmpty(_) => ErrorKind::GroupNotEmpty,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::Authorization(_) => ErrorKind::Authorization,
            Error::DeleteGroup(_)
            | Error::CreateEntity(_)
            | Error::UpdateEntity(_)
            | Error::RemoveEntity(_)
            | Error::ViewEntity(_) => ErrorKind::Internal,
        }
    }

    pub fn create(err: impl Into<anyhow::Error>) -> Self {
        Error::CreateEntity(err.into())
    }

    pub fn update(err: impl Into<anyhow::Error>) -> Self {
        Error::UpdateEntity(err.into())
    }

    pub fn remove(err: impl Into<anyhow::Error>) -> Self {
        Error::RemoveEntity(err.into())
    }

    pub fn view(err: impl Into<anyhow::Error>) -> Self {
        Error::ViewEntity(err.into())
    }
}

impl From<arbiter_authz::AuthzError> for Error {
    fn from(err: arbiter_authz::AuthzError) -> Self {
        use arbiter_authz::AuthzError;
        match err {
            AuthzError::InvalidAction(_) | AuthzError::UnsupportedAction { .. } => {
                Error::MalformedPolicyAct(err.to_string())
            }
            AuthzError::UnknownEntityKind(_) | AuthzError::InvalidPermission(_) => {
                Error::MalformedEntity(err.to_string())
            }
            AuthzError::Casbin(_) => Error::ViewEntity(anyhow::Error::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_like_variants_share_a_kind() {
        let err = Error::MemberAlreadyAssigned {
            group_id: "g".into(),
            member_id: "m".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(Error::GroupConflict("g".into()).kind(), ErrorKind::Conflict);
        assert_eq!(Error::GroupNotFound("g".into()).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn wrapper_variants_are_internal_and_keep_their_source() {
        let err = Error::view(anyhow::anyhow!("connection reset"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("connection reset"));
    }

    #[test]
    fn policy_validation_errors_are_malformed() {
        for err in [
            Error::MissingPolicySub,
            Error::MissingPolicyObj,
            Error::MalformedPolicyAct("fly".into()),
            Error::InvalidGroupType("moon".into()),
        ] {
            assert_eq!(err.kind(), ErrorKind::MalformedEntity);
        }
    }

    #[test]
    fn authz_errors_convert() {
        let err: Error = arbiter_authz::AuthzError::InvalidAction("fly".into()).into();
        assert!(matches!(err, Error::MalformedPolicyAct(_)));
        let err: Error = arbiter_authz::AuthzError::InvalidPermission("x".into()).into();
        assert!(matches!(err, Error::MalformedEntity(_)));
    }
}
