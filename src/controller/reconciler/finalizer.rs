//! # Finalizer
//!
//! Adds and releases the controller finalizer on a `MailServer`. Both writes
//! are merge patches of the whole finalizer list guarded by the resource
//! version, so a concurrent edit surfaces as a conflict instead of being lost.

use super::types::{Reconciler, ReconcilerError};
use crate::constants::FINALIZER;
use crate::controller::store::ObjectKey;
use crate::crd::MailServer;
use serde_json::json;
use tracing::info;

#[must_use]
pub fn has_finalizer(ms: &MailServer) -> bool {
    ms.metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|name| name == FINALIZER))
}

async fn set_finalizers(
    ctx: &Reconciler,
    key: &ObjectKey,
    ms: &MailServer,
    finalizers: Vec<String>,
) -> Result<(), ReconcilerError> {
    let patch = json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": ms.metadata.resource_version,
        }
    });
    ctx.store.merge(key, &patch).await?;
    Ok(())
}

/// Returns false when the finalizer was already there
pub async fn add(ctx: &Reconciler, key: &ObjectKey, ms: &MailServer) -> Result<bool, ReconcilerError> {
    if has_finalizer(ms) {
        return Ok(false);
    }
    let mut finalizers = ms.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(FINALIZER.to_string());
    info!(resource = %key, "adding finalizer");
    set_finalizers(ctx, key, ms, finalizers).await?;
    Ok(true)
}

/// Let the deletion through. Owned objects go with the garbage collector.
pub async fn remove(
    ctx: &Reconciler,
    key: &ObjectKey,
    ms: &MailServer,
) -> Result<bool, ReconcilerError> {
    if !has_finalizer(ms) {
        return Ok(false);
    }
    let finalizers: Vec<String> = ms
        .metadata
        .finalizers
        .iter()
        .flatten()
        .filter(|name| name.as_str() != FINALIZER)
        .cloned()
        .collect();
    info!(resource = %key, "removing finalizer");
    set_finalizers(ctx, key, ms, finalizers).await?;
    Ok(true)
}
