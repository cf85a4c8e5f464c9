//! Tollgate - Distributed Fixed-Window Rate Limiting
//!
//! This crate decides whether a request identified by a (client, user,
//! resource) tuple is admitted, counting requests per fixed window in a
//! counter store shared by every service instance. Store failures are
//! reported as indeterminate decisions and denied by default.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
