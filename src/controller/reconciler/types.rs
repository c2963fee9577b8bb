//! # Types
//!
//! Core types for the reconciler.

use super::dkim::DkimParseError;
use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::exec::{ExecError, PodExecutor};
use crate::controller::registry::KindRegistry;
use crate::controller::store::{ObjectStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),
    #[error("Extraction failed: {0}")]
    Exec(#[from] ExecError),
    /// The referenced configuration is unusable until the user fixes it
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Domain cannot be changed from {bound} to {requested}")]
    DomainImmutable { bound: String, requested: String },
    #[error("Malformed DKIM record: {0}")]
    MalformedRecord(#[from] DkimParseError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Reconciliation cancelled, controller is shutting down")]
    Cancelled,
    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(#[from] anyhow::Error),
}

impl ReconcilerError {
    /// Short label for metrics
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilerError::Store(_) => "store",
            ReconcilerError::Exec(_) => "exec",
            ReconcilerError::Config(_) => "config",
            ReconcilerError::DomainImmutable { .. } => "domain-immutable",
            ReconcilerError::MalformedRecord(_) => "malformed-record",
            ReconcilerError::Serialization(_) => "serialization",
            ReconcilerError::Cancelled => "cancelled",
            ReconcilerError::ReconciliationFailed(_) => "other",
        }
    }
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared context handed to every reconcile pass
#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn ObjectStore>,
    pub executor: Arc<dyn PodExecutor>,
    pub registry: Arc<KindRegistry>,
    pub config: ControllerConfig,
    // Backoff state per resource (identified by namespace/name), driven by the error policy
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    /// Cancelled on shutdown; in-flight exec calls give up when it fires
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        executor: Arc<dyn PodExecutor>,
        registry: Arc<KindRegistry>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            executor,
            registry,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// Record a failure for `resource_key` and return (delay seconds, error count)
    pub fn next_backoff(&self, resource_key: &str) -> (u64, u32) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry(resource_key.to_string())
            .or_insert_with(|| {
                BackoffState::new(self.config.backoff_min_secs, self.config.backoff_max_secs)
            });
        state.increment_error();
        (state.backoff.next_backoff_seconds(), state.error_count)
    }

    /// Forget the failures of `resource_key` after a successful pass
    pub fn reset_backoff(&self, resource_key: &str) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = states.get_mut(resource_key) {
            state.reset();
        }
    }
}
