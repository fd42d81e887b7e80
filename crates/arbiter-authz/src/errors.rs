use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("action {action} is not defined for {kind} entities")]
    UnsupportedAction { kind: &'static str, action: String },
    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),
    #[error("invalid channel permission: {0}")]
    InvalidPermission(String),
    #[error("casbin error: {0}")]
    Casbin(#[from] casbin::Error),
}

pub type AuthzResult<T> = Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_variants() {
        let errors = vec![
            AuthzError::InvalidAction("bad".to_string()),
            AuthzError::UnsupportedAction {
                kind: "thing",
                action: "publish".to_string(),
            },
            AuthzError::UnknownEntityKind("tenant".to_string()),
            AuthzError::InvalidPermission("write".to_string()),
        ];

        for error in errors {
            let rendered = error.to_string();
            assert!(!rendered.is_empty());
        }
    }
}
