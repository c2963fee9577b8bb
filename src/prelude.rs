//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use mailserver_controller::prelude::*;
//! ```

pub use crate::crd::*;

pub use crate::controller::reconciler::{
    reconcile, reconcile_key, Outcome, PendingReason, Phase, Reconciler, ReconcilerError,
};

pub use crate::controller::exec::{ExecError, ExecOutput, PodExecutor};
pub use crate::controller::registry::{KindRegistry, ResourceKind};
pub use crate::controller::store::{MemoryStore, ObjectKey, ObjectStore, StoreError};

pub use crate::config::ControllerConfig;
