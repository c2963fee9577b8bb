//! # Status
//!
//! Status writes. Each one patches a single field of the status subresource,
//! so every observed fact lands in its own pass.

use super::types::{Reconciler, ReconcilerError};
use crate::controller::store::ObjectKey;
use serde::Serialize;
use serde_json::json;
use tracing::info;

/// Merge `{"status": {field: value}}` into the `MailServer`
pub async fn set_field<V: Serialize + std::fmt::Debug>(
    ctx: &Reconciler,
    key: &ObjectKey,
    field: &str,
    value: V,
) -> Result<(), ReconcilerError> {
    info!(resource = %key, field = field, value = ?value, "updating status");
    let patch = json!({ "status": { field: serde_json::to_value(&value)? } });
    ctx.store.merge_status(key, &patch).await?;
    Ok(())
}
