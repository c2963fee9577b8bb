//! # Runtime
//!
//! Process wiring around the reconciler.
//!
//! - `initialization.rs` - crypto provider, tracing, metrics, HTTP server, client
//! - `discovery.rs` - API groups served by the cluster
//! - `leader_election.rs` - Lease-based leader election between replicas
//! - `watch_loop.rs` - the controller watch loop and shutdown signals
//! - `error_policy.rs` - reconcile error backoff and watch error handling

pub mod discovery;
pub mod error_policy;
pub mod initialization;
pub mod leader_election;
pub mod watch_loop;
