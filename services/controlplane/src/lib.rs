//! Arbiter access-control plane library crate.
//!
//! # Purpose
//! Exposes the group hierarchy store, the policy/role evaluator, the
//! authorization cache and gateway, the admin services and their HTTP API for
//! use by the binary and tests.
//!
//! # Layout
//! `store` is authoritative; `authz` decides; `service` authorizes and
//! mutates; `cache` and `gateway` serve the high-rate authorization path;
//! `api` and `app` expose the services over HTTP.
pub mod api;
pub mod app;
pub mod authz;
pub mod cache;
pub mod config;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod model;
pub mod observability;
pub mod service;
pub mod store;
