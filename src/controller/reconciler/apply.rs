//! # Apply
//!
//! Converges one desired object at a time with server-side apply. A write
//! only happens when a dry-run of the same apply would change the live
//! object; fields other writers own on the live side are left alone.

use super::diff;
use super::types::{Reconciler, ReconcilerError};
use crate::controller::resources::TargetObject;
use crate::observability::metrics;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::{debug, info};

/// Result of converging one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    Created,
    Patched,
    Unchanged,
}

impl ApplyResult {
    #[must_use]
    pub fn changed(self) -> bool {
        self != ApplyResult::Unchanged
    }
}

/// Bring the live copy of `target` in line with it.
///
/// Every kind except the retained ones gets `owner` as controller reference.
pub async fn converge(
    ctx: &Reconciler,
    owner: &OwnerReference,
    target: &TargetObject,
) -> Result<ApplyResult, ReconcilerError> {
    let kind = target.kind;
    let key = target.key()?;
    let mut desired = target.object.clone();
    if !ctx.registry.is_retained(kind) {
        desired.metadata.owner_references = Some(vec![owner.clone()]);
    }

    let Some(live) = ctx.store.get(&key).await? else {
        info!(resource = %key, "creating");
        ctx.store.create(kind, &desired).await?;
        metrics::increment_objects_applied(kind.as_str());
        return Ok(ApplyResult::Created);
    };

    let preview = ctx.store.apply(kind, &desired, true).await?;
    if diff::up_to_date(serde_json::to_value(&preview)?, serde_json::to_value(&live)?) {
        debug!(resource = %key, "no changes");
        return Ok(ApplyResult::Unchanged);
    }

    info!(resource = %key, "applying");
    ctx.store.apply(kind, &desired, false).await?;
    metrics::increment_objects_applied(kind.as_str());
    Ok(ApplyResult::Patched)
}

/// Delete `target` if it exists. Kinds the cluster does not serve are skipped.
pub async fn retire(ctx: &Reconciler, target: &TargetObject) -> Result<bool, ReconcilerError> {
    if !ctx.registry.is_available(target.kind) {
        return Ok(false);
    }
    let key = target.key()?;
    let deleted = ctx.store.delete(&key).await?;
    if deleted {
        info!(resource = %key, "deleted resource");
        metrics::increment_objects_deleted(target.kind.as_str());
    }
    Ok(deleted)
}
