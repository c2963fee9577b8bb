//! # Object Store
//!
//! The narrow object-store seam the reconciler works against. Every dependent
//! object is handled as a `DynamicObject` keyed by kind, namespace and name.
//!
//! - `cluster.rs` - implementation over the Kubernetes API
//! - `memory.rs` - in-process implementation used by tests

mod cluster;
mod memory;

pub use cluster::KubeStore;
pub use memory::{MemoryStore, WriteOp};

use crate::controller::registry::ResourceKind;
use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a stored object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an object carrying its own name and namespace
    pub fn of(kind: ResourceKind, obj: &DynamicObject) -> Result<Self, StoreError> {
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or(StoreError::MissingName(kind))?;
        let namespace = obj.metadata.namespace.clone().unwrap_or_default();
        Ok(Self::new(kind, namespace, name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(ObjectKey),
    #[error("{0} already exists")]
    AlreadyExists(ObjectKey),
    #[error("{0} was modified concurrently")]
    Conflict(ObjectKey),
    #[error("kind {0} is not served by the cluster")]
    KindUnavailable(ResourceKind),
    #[error("{0} object has no name")]
    MissingName(ResourceKind),
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Generic CRUD over dependent objects
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read one object, `None` when it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, StoreError>;

    /// List the objects of a kind in a namespace whose labels contain `labels`
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    async fn create(
        &self,
        kind: ResourceKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Server-side apply. With `dry_run` nothing is persisted and the result
    /// is what the write would produce.
    async fn apply(
        &self,
        kind: ResourceKind,
        obj: &DynamicObject,
        dry_run: bool,
    ) -> Result<DynamicObject, StoreError>;

    /// Full update guarded by the object's resource version
    async fn replace(
        &self,
        kind: ResourceKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// JSON merge patch on the main resource
    async fn merge(&self, key: &ObjectKey, patch: &Value) -> Result<DynamicObject, StoreError>;

    /// JSON merge patch on the status subresource
    async fn merge_status(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject, StoreError>;

    /// Returns false when there was nothing to delete
    async fn delete(&self, key: &ObjectKey) -> Result<bool, StoreError>;
}

/// Format a label map as a selector string (`a=b,c=d`)
#[must_use]
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_selector_is_sorted() {
        let labels = BTreeMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        assert_eq!(label_selector(&labels), "a=1,b=2");
        assert_eq!(label_selector(&BTreeMap::new()), "");
    }

    #[test]
    fn test_key_display() {
        let key = ObjectKey::new(ResourceKind::Service, "mail", "mail-example-com");
        assert_eq!(key.to_string(), "Service mail/mail-example-com");
    }
}
