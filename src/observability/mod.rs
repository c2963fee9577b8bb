//! # Observability
//!
//! Prometheus metrics for the controller. Logging goes through `tracing`,
//! initialized in `runtime::initialization`.

pub mod metrics;

pub use metrics::*;
