//! Domain services fronting the store.
//!
//! # Purpose
//! Each service authorizes the caller through the [`Evaluator`], performs the
//! authoritative mutation, then publishes a change event. Transport layers
//! (HTTP handlers, the gRPC gateway) only translate requests into calls here.
//!
//! # Key invariants
//! - Authorization happens before any write.
//! - Events are published only after the store call succeeded.
//!
//! [`Evaluator`]: crate::authz::Evaluator
use crate::errors::{Error, Result};
use crate::model::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

pub mod entities;
pub mod groups;
pub mod policies;
pub mod roles;
#[cfg(test)]
pub(crate) mod testing;

pub use entities::EntityService;
pub use groups::GroupService;
pub use policies::PolicyService;
pub use roles::{RoleManager, provision_builtin_roles};

/// Authenticated caller acting inside one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub subject: String,
    pub domain_id: String,
}

impl Session {
    pub fn new(subject: impl Into<String>, domain_id: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            domain_id: domain_id.into(),
        }
    }

    pub(crate) fn require_subject(&self) -> Result<&str> {
        if self.subject.is_empty() {
            return Err(Error::Authentication("missing subject".to_string()));
        }
        Ok(&self.subject)
    }
}

/// Applies the default page size and the global cap.
pub fn clamp_limit(limit: u64) -> u64 {
    match limit {
        0 => DEFAULT_PAGE_LIMIT,
        limit => limit.min(MAX_PAGE_LIMIT),
    }
}
