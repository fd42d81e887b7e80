//! Access decisions for the control plane.
//!
//! # Purpose
//! Hosts the Casbin enforcer builder and the capability-chain evaluator that
//! every admin service and the authorization gateway consult.
pub mod enforcer;
pub mod evaluator;

pub use evaluator::{EvalContext, Evaluator};
