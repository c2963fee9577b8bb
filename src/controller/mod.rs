//! # Controller
//!
//! Core controller modules for the MailServer controller.
//!
//! - `backoff`: Fibonacci backoff for failed reconciliations
//! - `exec`: command execution inside pods
//! - `reconciler`: the per-resource state machine and diff/apply engine
//! - `registry`: resource kinds the controller writes and their API coordinates
//! - `resources`: desired-object generation from a `MailServer`
//! - `server`: HTTP server for metrics and health checks
//! - `store`: object access, backed by the cluster or by memory

pub mod backoff;
pub mod exec;
pub mod reconciler;
pub mod registry;
pub mod resources;
pub mod server;
pub mod store;
