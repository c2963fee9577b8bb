//! # Watch Loop
//!
//! Controller watch loop over `MailServer` resources. Every dependent kind the
//! cluster serves is watched too, and changes to an owned object requeue its
//! `MailServer`. The runtime never runs two passes for the same object at once.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{reconcile, Reconciler, ReconcilerError};
use crate::controller::server::ServerState;
use crate::crd::MailServer;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use kube::api::{Api, DynamicObject};
use kube::{Client, ResourceExt};
use kube_runtime::{controller::Action, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Run the controller watch loop until shutdown.
///
/// Shutdown is driven by [`spawn_shutdown_listener`], which the caller
/// starts before leader election so a standby replica exits on SIGTERM too.
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    config: ControllerConfig,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let backoff_duration_ms = Arc::new(AtomicU64::new(config.watch_backoff_start_ms));

    loop {
        if reconciler.cancel.is_cancelled() || !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let mailservers: Api<MailServer> = Api::all(client.clone());
        let mut controller = Controller::new(mailservers, watcher::Config::default().any_semantic());
        for kind in reconciler.registry.owned_kinds() {
            let Some(ar) = reconciler.registry.api_resource(kind) else {
                continue;
            };
            debug!(kind = %kind, "watching owned kind");
            let owned: Api<DynamicObject> = Api::all_with(client.clone(), ar);
            controller = controller.owns_with(owned, ar.clone(), watcher::Config::default());
        }

        let backoff = Arc::clone(&backoff_duration_ms);
        let filter_config = config.clone();
        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );

        controller
            .shutdown_on_signal()
            .run(
                reconcile_fn,
                |obj, error, ctx| handle_reconciliation_error(obj, error, ctx),
                Arc::clone(&reconciler),
            )
            .filter_map(move |event| {
                let backoff = Arc::clone(&backoff);
                let config = filter_config.clone();
                async move {
                    match &event {
                        Ok(_) => {
                            backoff.store(config.watch_backoff_start_ms, Ordering::Relaxed);
                            debug!("watch.event.success");
                            Some(event)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                config.watch_backoff_max_ms,
                                config.watch_restart_delay(),
                            )
                            .await
                            .map(|()| event)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .instrument(watch_span)
            .await;

        let delay = config.watch_restart_delay_after_end();
        if !server_state.ready() || !wait_before_restart(delay, &reconciler.cancel).await {
            info!("Shutdown requested, exiting watch loop");
            break;
        }
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Sleep before restarting an ended watch stream.
///
/// Returns false when shutdown begins first. kube-runtime ends the stream on
/// the same signals, so the listener may not have run yet when the stream ends.
async fn wait_before_restart(delay: Duration, cancel: &CancellationToken) -> bool {
    warn!(
        "Controller watch stream ended, restarting in {} seconds...",
        delay.as_secs()
    );
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = cancel.cancelled() => false,
    }
}

/// Resolves on SIGINT, or on SIGTERM where the platform has it
pub async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal(SignalKind::terminate())?;
    #[cfg(unix)]
    let terminated = terminate.recv();
    #[cfg(not(unix))]
    let terminated = std::future::pending::<Option<()>>();

    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminated => Ok(()),
    }
}

/// Stop reporting ready and abort in-flight exec calls
pub fn begin_shutdown(server_state: &ServerState, cancel: &CancellationToken) {
    server_state.set_ready(false);
    cancel.cancel();
}

/// Spawn the task that turns SIGINT/SIGTERM into [`begin_shutdown`]
pub fn spawn_shutdown_listener(server_state: Arc<ServerState>, cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        begin_shutdown(&server_state, &cancel);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });
}

/// Reconcile one `MailServer` inside its own span
async fn reconcile_fn(
    obj: Arc<MailServer>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let reconcile_span = tracing::span!(
        tracing::Level::INFO,
        "controller.watch.reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.generation = obj.metadata.generation.unwrap_or(0),
        event.r#type = "watch_triggered"
    );

    async move {
        let result = reconcile(obj, ctx).await;
        match &result {
            Ok(action) => debug!(action = ?action, "watch.event.reconciled"),
            Err(e) => debug!(error = %e, "watch.event.reconciliation_failed"),
        }
        result
    }
    .instrument(reconcile_span)
    .await
}
