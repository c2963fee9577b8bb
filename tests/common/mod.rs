//! Common test utilities for reconcile scenarios
//!
//! Drives the reconciler against the in-memory store with a scripted pod
//! executor, and plays the parts of the cluster the controller waits on
//! (load balancer, scheduler, volume provisioner).

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use mailserver_controller::config::ControllerConfig;
use mailserver_controller::controller::exec::{ExecError, ExecOutput, PodExecutor};
use mailserver_controller::controller::reconciler::{
    reconcile_key, Outcome, Reconciler, ReconcilerError,
};
use mailserver_controller::controller::registry::{KindRegistry, ResourceKind};
use mailserver_controller::controller::store::{MemoryStore, ObjectKey};
use mailserver_controller::crd::MailServer;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const NAMESPACE: &str = "mail";
pub const NAME: &str = "example";
pub const PUBLIC_IP: &str = "203.0.113.7";

/// What `opendkim-genkey` leaves in `mail.txt`
pub const DKIM_KEY_FILE: &str = "mail._domainkey\tIN\tTXT\t( \"v=DKIM1; h=sha256; k=rsa; \"\n\t  \"p=MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAx\"\n\t  \"Yz0IDAQAB\" )  ; ----- DKIM key mail for example.com\n";

/// Executor answering by command substring
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    responses: Mutex<Vec<(String, String)>>,
    calls: Mutex<Vec<String>>,
    hang: AtomicBool,
}

impl ScriptedExecutor {
    /// Answer commands containing `pattern` with `stdout`, replacing any
    /// earlier answer for the same pattern
    pub fn respond(&self, pattern: &str, stdout: &str) {
        let mut responses = self.responses.lock().unwrap();
        responses.retain(|(p, _)| p != pattern);
        responses.push((pattern.to_string(), stdout.to_string()));
    }

    /// Drop the answer for `pattern`; matching commands then fail
    pub fn forget(&self, pattern: &str) {
        self.responses.lock().unwrap().retain(|(p, _)| p != pattern);
    }

    /// Never complete from now on
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    /// Shell commands run so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PodExecutor for ScriptedExecutor {
    async fn exec(
        &self,
        _namespace: &str,
        _pod: &str,
        _container: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput, ExecError> {
        let script = command.last().cloned().unwrap_or_default();
        self.calls.lock().unwrap().push(script.clone());
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let responses = self.responses.lock().unwrap();
        match responses.iter().find(|(pattern, _)| script.contains(pattern.as_str())) {
            Some((_, stdout)) => Ok(ExecOutput {
                stdout: stdout.clone(),
                stderr: String::new(),
            }),
            None => Err(ExecError::Failed {
                message: "command terminated with exit code 1".to_string(),
                stderr: format!("no scripted answer for {script}"),
            }),
        }
    }
}

/// `example.com` in namespace `mail`, with `overrides` merged into the spec
pub fn mail_server(overrides: Value) -> MailServer {
    let mut spec = json!({
        "domain": "example.com",
        "issuerRef": {"name": "letsencrypt", "kind": "ClusterIssuer"}
    });
    if let (Some(base), Some(extra)) = (spec.as_object_mut(), overrides.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    let mut ms = MailServer::new(NAME, serde_json::from_value(spec).unwrap());
    ms.metadata.namespace = Some(NAMESPACE.to_string());
    ms
}

pub fn key(kind: ResourceKind, name: &str) -> ObjectKey {
    ObjectKey::new(kind, NAMESPACE, name)
}

/// One seeded `MailServer` with its reconciler
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub executor: Arc<ScriptedExecutor>,
    pub ctx: Reconciler,
    pub key: ObjectKey,
}

impl Harness {
    pub fn new(overrides: Value) -> Self {
        Self::with_config(overrides, ControllerConfig::default())
    }

    pub fn with_config(overrides: Value, config: ControllerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(ScriptedExecutor::default());
        executor.respond("curl", &format!("{PUBLIC_IP}\n"));
        executor.respond("mail.txt", DKIM_KEY_FILE);

        let ms = serde_json::to_value(mail_server(overrides)).unwrap();
        let key = store.insert(ResourceKind::MailServer, ms).unwrap();
        let ctx = Reconciler::new(
            Arc::clone(&store) as _,
            Arc::clone(&executor) as _,
            Arc::new(KindRegistry::new()),
            config,
        );
        Self {
            store,
            executor,
            ctx,
            key,
        }
    }

    pub async fn pass(&self) -> Result<Outcome, ReconcilerError> {
        reconcile_key(&self.ctx, &self.key).await
    }

    /// Run passes while each one wrote something; returns every outcome
    pub async fn settle(&self) -> Result<Vec<Outcome>, ReconcilerError> {
        let mut outcomes = Vec::new();
        for _ in 0..50 {
            let outcome = self.pass().await?;
            outcomes.push(outcome);
            match outcome {
                Outcome::Pending(reason) if reason.wrote() => continue,
                _ => return Ok(outcomes),
            }
        }
        panic!("reconcile did not settle: {outcomes:?}");
    }

    /// Bootstrap and play the cluster until the resource is converged
    pub async fn converge(&self) {
        self.settle().await.unwrap();
        self.publish_address(PUBLIC_IP);
        self.settle().await.unwrap();
        self.set_available(1);
        self.bind_volume("10Gi");
        self.start_pod("Running");
        let outcomes = self.settle().await.unwrap();
        assert_eq!(outcomes.last(), Some(&Outcome::Converged), "{outcomes:?}");
    }

    pub fn mail_server(&self) -> MailServer {
        serde_json::from_value(self.store.value(&self.key).unwrap()).unwrap()
    }

    /// Merge `patch` into the `MailServer` the way a user edit would
    pub async fn edit(&self, patch: Value) {
        use mailserver_controller::controller::store::ObjectStore;
        self.store.merge(&self.key, &patch).await.unwrap();
        self.store.clear_writes();
    }

    pub fn publish_address(&self, ip: &str) {
        self.store
            .set_status(
                &key(ResourceKind::Service, "mail-example-com"),
                json!({"loadBalancer": {"ingress": [{"ip": ip}]}}),
            )
            .unwrap();
    }

    pub fn set_available(&self, replicas: i32) {
        self.store
            .set_status(
                &key(ResourceKind::Deployment, "mail-example-com"),
                json!({"availableReplicas": replicas}),
            )
            .unwrap();
    }

    pub fn bind_volume(&self, size: &str) {
        self.store
            .set_status(
                &key(ResourceKind::PersistentVolumeClaim, "example-com-data"),
                json!({"phase": "Bound", "capacity": {"storage": size}}),
            )
            .unwrap();
    }

    /// Schedule a pod of the mail workload in `phase`
    pub fn start_pod(&self, phase: &str) {
        let deploy = self
            .store
            .value(&key(ResourceKind::Deployment, "mail-example-com"))
            .unwrap();
        let labels = deploy.pointer("/spec/template/metadata/labels").cloned().unwrap();
        self.store
            .insert(
                ResourceKind::Pod,
                json!({
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "metadata": {"name": "mail-example-com-7d9f8-abcde", "namespace": NAMESPACE, "labels": labels},
                    "status": {"phase": phase},
                }),
            )
            .unwrap();
    }

    /// Stored object under `kind`/`name`
    pub fn value(&self, kind: ResourceKind, name: &str) -> Option<Value> {
        self.store.value(&key(kind, name))
    }
}
