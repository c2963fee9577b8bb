//! # Error Policy
//!
//! What the watch loop does after a failed `MailServer` pass (per-resource
//! Fibonacci requeue) and after a failed watch stream (classified, then either
//! retried in place or handed back to the restart loop).

use crate::controller::reconciler::{resource_key, Reconciler, ReconcilerError};
use crate::crd::MailServer;
use crate::observability::metrics;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per resource so one broken `MailServer` does not
/// slow down the others. Configuration errors (bind secret missing a key,
/// domain rename, malformed signing key) take the same path and keep being
/// retried until the user fixes them.
pub fn handle_reconciliation_error(
    obj: Arc<MailServer>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.metadata.name.as_deref().unwrap_or("unknown");
    let namespace = obj.metadata.namespace.as_deref().unwrap_or("default");

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name,
        resource.namespace = namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    if matches!(error, ReconcilerError::Cancelled) {
        info!("Reconciliation of {}/{} interrupted by shutdown", namespace, name);
        return Action::await_change();
    }

    error!("Reconciliation error for {}/{}: {}", namespace, name, error);
    metrics::increment_reconciliation_errors(error.as_str());

    let (backoff_seconds, error_count) = ctx.next_backoff(&resource_key(namespace, name));
    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));

    info!(
        "🔄 Retrying with Fibonacci backoff: {}s (error count: {}, trigger source: error-backoff)",
        backoff_seconds, error_count
    );
    info!(
        "📅 Next retry scheduled: {} (in {}s, trigger source: error-backoff)",
        next_trigger_time.to_rfc3339(),
        backoff_seconds
    );

    metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Watch error categories, in the order they are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    NotFound,
    Unauthorized,
    Expired,
    TooManyRequests,
    Other,
}

/// Classify a watch stream error from its debug rendering.
///
/// 404 is checked before 401: a 404 returned as plain text surfaces as a
/// serde error whose chain also mentions `WatchFailed`.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if is_not_found {
        return WatchErrorKind::NotFound;
    }
    if error_string.contains("401") || error_string.contains("Unauthorized") {
        return WatchErrorKind::Unauthorized;
    }
    if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        return WatchErrorKind::Expired;
    }
    if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        return WatchErrorKind::TooManyRequests;
    }
    WatchErrorKind::Other
}

/// Handle watch stream errors with appropriate classification and backoff
///
/// Returns `None` to filter out the error (allow restart) or `Some(())` to continue.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match classify_watch_error(error_string) {
        WatchErrorKind::Unauthorized => {
            error!(
                "❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired"
            );
            error!("🔍 SRE Diagnostics:");
            error!("   1. Verify the controller ClusterRole still grants mailservers and the dependent kinds:");
            error!("      kubectl get clusterrole kube-mailserver -o yaml");
            error!("   2. Verify the ClusterRoleBinding still binds the ServiceAccount:");
            error!("      kubectl get clusterrolebinding kube-mailserver -o yaml");
            error!("   3. Verify the pods/exec permission used for DKIM and public address lookup:");
            error!(
                "      kubectl auth can-i create pods/exec --as=system:serviceaccount:kube-mailserver-system:kube-mailserver --all-namespaces"
            );
            warn!(
                "⏳ Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorKind::Expired => {
            warn!(
                "Watch resource version expired (410) - this is normal during pod restarts, watch will restart"
            );
            warn!(error_type = "410", "watch.error.resource_version_expired");
            None
        }
        WatchErrorKind::TooManyRequests => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            let new_backoff = current_backoff.saturating_mul(2).min(max_backoff_ms);
            backoff.store(new_backoff, Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            let resource_info = if error_string.contains("integer `404`") {
                "CRD or resource may have been deleted (404 returned as plain text)"
            } else if error_string.contains("MailServer") {
                "MailServer resource"
            } else if error_string.contains("DNSRecord") {
                "DNSRecord resource"
            } else if error_string.contains("Certificate") {
                "cert-manager Certificate resource"
            } else {
                "Resource"
            };
            warn!(
                "{} not found (404) - this may be normal if resource was deleted or CRD is missing. Error: {}",
                resource_info, error_string
            );
            Some(())
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}
