//! # Extraction
//!
//! Reads values that only exist inside a running mail pod (the public
//! address, the generated signing key) by running a shell command in it.
//!
//! A workload without a running pod is not an error: the caller gets
//! [`Extraction::NotReady`] and tries again on a later pass.

use super::types::{Reconciler, ReconcilerError};
use crate::constants::MAILSERVER_CONTAINER;
use crate::controller::exec::ExecError;
use crate::controller::registry::ResourceKind;
use crate::controller::store::ObjectKey;
use crate::observability::metrics;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Outcome of a command run in the workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// No pod can run the command yet
    NotReady(&'static str),
    /// Captured standard output
    Ready(String),
}

/// Convert an erased object into its typed form
pub(crate) fn typed<K: DeserializeOwned>(obj: DynamicObject) -> Result<K, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(obj)?)
}

/// Run `command` through `sh -c` in the first pod of the workload.
///
/// Pods are selected with the workload template labels and taken in name
/// order; the first one must be `Running`. The call is bounded by the exec
/// timeout and gives up when the controller shuts down.
pub async fn exec_in_workload(
    ctx: &Reconciler,
    workload: &ObjectKey,
    command: &str,
) -> Result<Extraction, ReconcilerError> {
    let result = run(ctx, workload, command).await;
    let outcome = match &result {
        Ok(Extraction::Ready(_)) => "ready",
        Ok(Extraction::NotReady(_)) => "not-ready",
        Err(_) => "error",
    };
    metrics::increment_extractions(outcome);
    result
}

async fn run(
    ctx: &Reconciler,
    workload: &ObjectKey,
    command: &str,
) -> Result<Extraction, ReconcilerError> {
    let Some(deploy) = ctx.store.get(workload).await? else {
        return Ok(Extraction::NotReady("workload does not exist"));
    };
    let deploy: Deployment = typed(deploy)?;
    let labels = deploy
        .spec
        .and_then(|spec| spec.template.metadata)
        .and_then(|meta| meta.labels)
        .unwrap_or_default();
    if labels.is_empty() {
        return Ok(Extraction::NotReady("workload has no pod labels"));
    }

    let mut pods = ctx
        .store
        .list(ResourceKind::Pod, &workload.namespace, &labels)
        .await?
        .into_iter()
        .map(typed::<Pod>)
        .collect::<Result<Vec<_>, _>>()?;
    pods.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

    let Some(pod) = pods.into_iter().next() else {
        return Ok(Extraction::NotReady("no pod scheduled"));
    };
    let running = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Running");
    let Some(pod_name) = pod.metadata.name.filter(|_| running) else {
        return Ok(Extraction::NotReady("pod not running"));
    };

    debug!(pod = %pod_name, command = command, "extraction.exec");
    let argv = vec!["sh".to_string(), "-c".to_string(), command.to_string()];
    let exec = ctx
        .executor
        .exec(&workload.namespace, &pod_name, MAILSERVER_CONTAINER, argv);
    let timeout = ctx.config.exec_timeout();

    tokio::select! {
        () = ctx.cancel.cancelled() => Err(ReconcilerError::Cancelled),
        result = tokio::time::timeout(timeout, exec) => match result {
            Ok(Ok(output)) => Ok(Extraction::Ready(output.stdout)),
            Ok(Err(ExecError::Cancelled)) => Err(ReconcilerError::Cancelled),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ExecError::Timeout(timeout.as_secs()).into()),
        },
    }
}
