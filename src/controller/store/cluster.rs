//! Object store backed by the Kubernetes API.

use super::{label_selector, ObjectKey, ObjectStore, StoreError};
use crate::constants::FIELD_MANAGER;
use crate::controller::registry::{KindRegistry, ResourceKind};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    registry: Arc<KindRegistry>,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client, registry: Arc<KindRegistry>) -> Self {
        Self { client, registry }
    }

    fn api(&self, kind: ResourceKind, namespace: &str) -> Result<Api<DynamicObject>, StoreError> {
        if !self.registry.is_available(kind) {
            return Err(StoreError::KindUnavailable(kind));
        }
        let ar = self
            .registry
            .api_resource(kind)
            .ok_or(StoreError::KindUnavailable(kind))?;
        Ok(Api::namespaced_with(self.client.clone(), namespace, ar))
    }

    /// Fill apiVersion/kind from the registry, required by server-side apply
    fn typed(&self, kind: ResourceKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let ar = self
            .registry
            .api_resource(kind)
            .ok_or(StoreError::KindUnavailable(kind))?;
        let mut obj = obj.clone();
        obj.types = Some(kube::core::TypeMeta {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
        });
        Ok(obj)
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == 404)
}

fn classify(key: &ObjectKey, err: kube::Error) -> StoreError {
    match &err {
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound(key.clone()),
        kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(key.clone())
        }
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict(key.clone()),
        _ => StoreError::Api(err),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, StoreError> {
        let api = self.api(key.kind, &key.namespace)?;
        api.get_opt(&key.name).await.map_err(|e| classify(key, e))
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let api = self.api(kind, namespace)?;
        let params = ListParams::default().labels(&label_selector(labels));
        Ok(api.list(&params).await?.items)
    }

    async fn create(
        &self,
        kind: ResourceKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = ObjectKey::of(kind, obj)?;
        let api = self.api(kind, &key.namespace)?;
        let obj = self.typed(kind, obj)?;
        api.create(&PostParams::default(), &obj)
            .await
            .map_err(|e| classify(&key, e))
    }

    async fn apply(
        &self,
        kind: ResourceKind,
        obj: &DynamicObject,
        dry_run: bool,
    ) -> Result<DynamicObject, StoreError> {
        let key = ObjectKey::of(kind, obj)?;
        let api = self.api(kind, &key.namespace)?;
        let mut obj = self.typed(kind, obj)?;
        obj.metadata.managed_fields = None;
        let mut params = PatchParams::apply(FIELD_MANAGER).force();
        if dry_run {
            params = params.dry_run();
        }
        debug!(object = %key, dry_run, "store.apply");
        api.patch(&key.name, &params, &Patch::Apply(&obj))
            .await
            .map_err(|e| classify(&key, e))
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = ObjectKey::of(kind, obj)?;
        let api = self.api(kind, &key.namespace)?;
        let obj = self.typed(kind, obj)?;
        api.replace(&key.name, &PostParams::default(), &obj)
            .await
            .map_err(|e| classify(&key, e))
    }

    async fn merge(&self, key: &ObjectKey, patch: &Value) -> Result<DynamicObject, StoreError> {
        let api = self.api(key.kind, &key.namespace)?;
        api.patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| classify(key, e))
    }

    async fn merge_status(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject, StoreError> {
        let api = self.api(key.kind, &key.namespace)?;
        api.patch_status(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| classify(key, e))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        let api = self.api(key.kind, &key.namespace)?;
        match api.delete(&key.name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(classify(key, e)),
        }
    }
}
