//! # Reconciler
//!
//! Reconciliation of `MailServer` resources.
//!
//! ## Module Structure
//!
//! - `types.rs` - reconciler context, error type, backoff state
//! - `steps.rs` - ordered phases and their outcomes
//! - `reconcile.rs` - the pass driver and the phases
//! - `apply.rs` - converge or retire one dependent object
//! - `diff.rs` - derivative equality between desired and live objects
//! - `extract.rs` - commands run in the mail workload
//! - `dkim.rs` - zone-file TXT record parser
//! - `finalizer.rs` - finalizer bookkeeping
//! - `status.rs` - single-field status writes

pub mod apply;
pub mod diff;
pub mod dkim;
pub mod extract;
pub mod finalizer;
pub mod reconcile;
pub mod status;
pub mod steps;
pub mod types;

pub use reconcile::{next_action, reconcile, reconcile_key, resource_key};
pub use steps::{Outcome, PendingReason, Phase, StepOutcome};
pub use types::{BackoffState, Reconciler, ReconcilerError};
