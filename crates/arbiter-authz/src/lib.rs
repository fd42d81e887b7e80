//! Arbiter authorization primitives shared by the control plane and its clients.
//!
//! # Purpose
//! Centralizes the action vocabulary of every entity kind, the built-in role
//! definitions seeded at entity creation, the channel permissions checked by
//! protocol adapters, the Casbin model, and the capability chain the evaluator
//! is assembled from.
//!
//! # Key invariants
//! - Every action an entity kind accepts is listed in its catalogue; policies
//!   and roles carrying anything else are rejected.
//! - Built-in role names are reserved per entity kind.
//! - A capability chain denies when no link reaches a decision.
//!
//! # Examples
//! ```rust
//! use arbiter_authz::{Action, EntityKind};
//!
//! assert!(EntityKind::Channel.supports(Action::Publish));
//! assert!(!EntityKind::Thing.supports(Action::Publish));
//! ```

mod action;
mod capability;
mod casbin_model;
mod entity;
mod errors;
mod permission;
mod role;

pub use action::Action;
pub use capability::{Capability, CapabilityChain, Decision, Verdict};
pub use casbin_model::{casbin_model, casbin_model_string};
pub use entity::EntityKind;
pub use errors::{AuthzError, AuthzResult};
pub use permission::ChannelPermission;
pub use role::{ADMIN_ROLE, BuiltInRole, MEMBERSHIP_ROLE, builtin_role, builtin_roles};
