//! In-process object store.
//!
//! Behaves like the API server for what the reconciler relies on: resource
//! versions, server-side apply merging, dry-runs that persist nothing, status
//! kept apart from the main resource, and finalizer-gated deletion. Every real
//! write is recorded so tests can assert on convergence.

use super::{ObjectKey, ObjectStore, StoreError};
use crate::constants::FIELD_MANAGER;
use crate::controller::registry::ResourceKind;
use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Apply,
    Replace,
    Merge,
    MergeStatus,
    Delete,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, Value>,
    writes: Vec<(WriteOp, ObjectKey)>,
    version: u64,
}

impl Inner {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Stamp server-managed metadata the way a persisted write would
    fn stamp(&mut self, value: &mut Value, op: WriteOp, bump_generation: bool) {
        let version = self.next_version();
        let meta = &mut value["metadata"];
        meta["resourceVersion"] = json!(version.to_string());
        if meta.get("uid").is_none() {
            meta["uid"] = json!(format!("uid-{version}"));
        }
        if meta.get("creationTimestamp").is_none() {
            meta["creationTimestamp"] = json!(now());
        }
        if bump_generation {
            let generation = meta.get("generation").and_then(Value::as_i64).unwrap_or(0);
            meta["generation"] = json!(generation + 1);
        }
        meta["managedFields"] =
            json!([{ "manager": FIELD_MANAGER, "operation": format!("{op:?}") }]);
    }

    fn record(&mut self, op: WriteOp, key: &ObjectKey) {
        self.writes.push((op, key.clone()));
    }
}

/// Fake object store for tests and local experiments
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object without recording a write
    pub fn insert(&self, kind: ResourceKind, obj: Value) -> Result<ObjectKey, StoreError> {
        let dynamic: DynamicObject = serde_json::from_value(obj.clone())?;
        let key = ObjectKey::of(kind, &dynamic)?;
        let mut value = obj;
        let mut inner = self.lock();
        inner.stamp(&mut value, WriteOp::Create, false);
        inner.objects.insert(key.clone(), value);
        Ok(key)
    }

    /// Overwrite an object's status without recording a write, the way a
    /// controller owning that kind would
    pub fn set_status(&self, key: &ObjectKey, status: Value) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let version = inner.next_version();
        let value = inner
            .objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if let Some(map) = value.as_object_mut() {
            map.insert("status".into(), status);
        }
        value["metadata"]["resourceVersion"] = json!(version.to_string());
        Ok(())
    }

    /// Raw stored value
    #[must_use]
    pub fn value(&self, key: &ObjectKey) -> Option<Value> {
        self.lock().objects.get(key).cloned()
    }

    /// Keys of every stored object of a kind
    #[must_use]
    pub fn keys(&self, kind: ResourceKind) -> Vec<ObjectKey> {
        self.lock()
            .objects
            .keys()
            .filter(|k| k.kind == kind)
            .cloned()
            .collect()
    }

    /// Writes recorded so far, dry-runs excluded
    #[must_use]
    pub fn writes(&self) -> Vec<(WriteOp, ObjectKey)> {
        self.lock().writes.clone()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn remove_meta(value: &mut Value, field: &str) {
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove(field);
    }
}

/// RFC 7386 merge. With `drop_nulls` null patch values are skipped instead of
/// removing the field, which is how an applied configuration treats them.
fn merge_into(target: &mut Value, patch: &Value, drop_nulls: bool) {
    match (target, patch) {
        (Value::Object(t), Value::Object(p)) => {
            for (k, v) in p {
                if v.is_null() {
                    if !drop_nulls {
                        t.remove(k);
                    }
                    continue;
                }
                let nested = v.is_object() && t.get(k).is_some_and(Value::is_object);
                if let (true, Some(existing)) = (nested, t.get_mut(k)) {
                    merge_into(existing, v, drop_nulls);
                    continue;
                }
                let mut fresh = Value::Null;
                if v.is_object() {
                    fresh = json!({});
                    merge_into(&mut fresh, v, drop_nulls);
                } else {
                    fresh.clone_from(v);
                }
                t.insert(k.clone(), fresh);
            }
        }
        (t, p) => {
            *t = p.clone();
        }
    }
}

fn to_dynamic(value: &Value) -> Result<DynamicObject, StoreError> {
    Ok(serde_json::from_value(value.clone())?)
}

fn is_deleting(value: &Value) -> bool {
    value.pointer("/metadata/deletionTimestamp").is_some_and(|v| !v.is_null())
}

fn has_finalizers(value: &Value) -> bool {
    value
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

fn labels_match(value: &Value, labels: &BTreeMap<String, String>) -> bool {
    labels.iter().all(|(k, v)| {
        value
            .pointer("/metadata/labels")
            .and_then(|l| l.get(k))
            .and_then(Value::as_str)
            == Some(v.as_str())
    })
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, StoreError> {
        self.lock().objects.get(key).map(to_dynamic).transpose()
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        self.lock()
            .objects
            .iter()
            .filter(|(k, v)| k.kind == kind && k.namespace == namespace && labels_match(v, labels))
            .map(|(_, v)| to_dynamic(v))
            .collect()
    }

    async fn create(
        &self,
        kind: ResourceKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = ObjectKey::of(kind, obj)?;
        let mut inner = self.lock();
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        let mut value = serde_json::to_value(obj)?;
        if let Value::Object(map) = &mut value {
            map.remove("status");
        }
        remove_meta(&mut value, "resourceVersion");
        inner.stamp(&mut value, WriteOp::Create, true);
        inner.record(WriteOp::Create, &key);
        inner.objects.insert(key, value.clone());
        to_dynamic(&value)
    }

    async fn apply(
        &self,
        kind: ResourceKind,
        obj: &DynamicObject,
        dry_run: bool,
    ) -> Result<DynamicObject, StoreError> {
        let key = ObjectKey::of(kind, obj)?;
        let mut desired = serde_json::to_value(obj)?;
        if let Value::Object(map) = &mut desired {
            map.remove("status");
        }
        remove_meta(&mut desired, "managedFields");
        remove_meta(&mut desired, "resourceVersion");

        let mut inner = self.lock();
        let mut merged = inner.objects.get(&key).cloned().unwrap_or_else(|| json!({}));
        let before = merged.clone();
        merge_into(&mut merged, &desired, true);
        if dry_run {
            return to_dynamic(&merged);
        }
        let spec_changed = strip_status(&before) != strip_status(&merged);
        inner.stamp(&mut merged, WriteOp::Apply, spec_changed);
        inner.record(WriteOp::Apply, &key);
        inner.objects.insert(key, merged.clone());
        to_dynamic(&merged)
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = ObjectKey::of(kind, obj)?;
        let mut inner = self.lock();
        let existing = inner
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let live_version = existing.pointer("/metadata/resourceVersion").cloned();
        if let Some(version) = &obj.metadata.resource_version {
            if live_version.as_ref().and_then(Value::as_str) != Some(version.as_str()) {
                return Err(StoreError::Conflict(key));
            }
        }
        let mut value = serde_json::to_value(obj)?;
        if let Value::Object(map) = &mut value {
            match existing.get("status") {
                Some(status) => map.insert("status".into(), status.clone()),
                None => map.remove("status"),
            };
        }
        for field in ["uid", "creationTimestamp", "generation"] {
            if let Some(v) = existing.pointer(&format!("/metadata/{field}")) {
                value["metadata"][field] = v.clone();
            }
        }
        inner.stamp(&mut value, WriteOp::Replace, true);
        inner.record(WriteOp::Replace, &key);
        inner.objects.insert(key, value.clone());
        to_dynamic(&value)
    }

    async fn merge(&self, key: &ObjectKey, patch: &Value) -> Result<DynamicObject, StoreError> {
        let mut inner = self.lock();
        let mut value = inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if let Some(version) = patch.pointer("/metadata/resourceVersion").and_then(Value::as_str) {
            if value.pointer("/metadata/resourceVersion").and_then(Value::as_str) != Some(version)
            {
                return Err(StoreError::Conflict(key.clone()));
            }
        }
        let mut patch = patch.clone();
        if let Value::Object(map) = &mut patch {
            map.remove("status");
        }
        merge_into(&mut value, &patch, false);
        inner.stamp(&mut value, WriteOp::Merge, false);
        inner.record(WriteOp::Merge, key);
        if is_deleting(&value) && !has_finalizers(&value) {
            inner.objects.remove(key);
        } else {
            inner.objects.insert(key.clone(), value.clone());
        }
        to_dynamic(&value)
    }

    async fn merge_status(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject, StoreError> {
        let mut inner = self.lock();
        let mut value = inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if let Some(status) = patch.get("status") {
            merge_into(&mut value, &json!({ "status": status }), false);
        }
        inner.stamp(&mut value, WriteOp::MergeStatus, false);
        inner.record(WriteOp::MergeStatus, key);
        inner.objects.insert(key.clone(), value.clone());
        to_dynamic(&value)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(mut value) = inner.objects.get(key).cloned() else {
            return Ok(false);
        };
        inner.record(WriteOp::Delete, key);
        if has_finalizers(&value) {
            if !is_deleting(&value) {
                value["metadata"]["deletionTimestamp"] = json!(now());
                inner.stamp(&mut value, WriteOp::Delete, false);
                inner.objects.insert(key.clone(), value);
            }
        } else {
            inner.objects.remove(key);
        }
        Ok(true)
    }
}

fn strip_status(value: &Value) -> Value {
    let mut value = value.clone();
    if let Value::Object(map) = &mut value {
        map.remove("status");
        if let Some(Value::Object(meta)) = map.get_mut("metadata") {
            for field in ["resourceVersion", "managedFields", "generation"] {
                meta.remove(field);
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(name: &str, data: Value) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": name, "namespace": "mail", "labels": {"app": "mail"}},
            "data": data,
        })
    }

    #[tokio::test]
    async fn test_dry_run_does_not_persist() {
        let store = MemoryStore::new();
        let key = store
            .insert(ResourceKind::Secret, secret("a", json!({"x": "MQ=="})))
            .unwrap();
        let desired: DynamicObject =
            serde_json::from_value(secret("a", json!({"y": "Mg=="}))).unwrap();
        let dry = store.apply(ResourceKind::Secret, &desired, true).await.unwrap();
        assert_eq!(dry.data["data"]["x"], "MQ==");
        assert_eq!(dry.data["data"]["y"], "Mg==");
        assert_eq!(store.write_count(), 0);
        assert!(store.value(&key).unwrap().pointer("/data/y").is_none());
    }

    #[tokio::test]
    async fn test_apply_creates_and_merges() {
        let store = MemoryStore::new();
        let desired: DynamicObject =
            serde_json::from_value(secret("a", json!({"x": "MQ=="}))).unwrap();
        store.apply(ResourceKind::Secret, &desired, false).await.unwrap();
        let key = ObjectKey::new(ResourceKind::Secret, "mail", "a");
        assert!(store.value(&key).is_some());
        assert_eq!(store.writes(), vec![(WriteOp::Apply, key)]);
    }

    #[tokio::test]
    async fn test_replace_rejects_stale_version() {
        let store = MemoryStore::new();
        store
            .insert(ResourceKind::Secret, secret("a", json!({})))
            .unwrap();
        let mut stale: DynamicObject = serde_json::from_value(secret("a", json!({}))).unwrap();
        stale.metadata.resource_version = Some("0".to_string());
        let err = store.replace(ResourceKind::Secret, &stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_finalizer_gates_deletion() {
        let store = MemoryStore::new();
        let mut obj = secret("a", json!({}));
        obj["metadata"]["finalizers"] = json!(["example.com/finalizer"]);
        let key = store.insert(ResourceKind::Secret, obj).unwrap();

        assert!(store.delete(&key).await.unwrap());
        assert!(store
            .value(&key)
            .unwrap()
            .pointer("/metadata/deletionTimestamp")
            .is_some());

        store
            .merge(&key, &json!({"metadata": {"finalizers": null}}))
            .await
            .unwrap();
        assert!(store.value(&key).is_none());
        assert!(!store.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters_by_labels() {
        let store = MemoryStore::new();
        store
            .insert(ResourceKind::Secret, secret("a", json!({})))
            .unwrap();
        let mut other = secret("b", json!({}));
        other["metadata"]["labels"] = json!({"app": "other"});
        store.insert(ResourceKind::Secret, other).unwrap();

        let labels = BTreeMap::from([("app".to_string(), "mail".to_string())]);
        let found = store
            .list(ResourceKind::Secret, "mail", &labels)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.name.as_deref(), Some("a"));
    }
}
