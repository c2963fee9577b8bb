//! # MailServer Controller
//!
//! Kubernetes controller converging docker-mailserver instances from
//! `MailServer` resources: the mail workload, its service, volume and
//! secrets, the TLS certificate, the DNS records (MX, SPF, DMARC, DKIM, SRV,
//! A) and the autoconfig companion with its ingress.

use anyhow::{anyhow, Result};
use mailserver_controller::constants::LEADER_LEASE_NAME;
use mailserver_controller::runtime::initialization::initialize;
use mailserver_controller::runtime::leader_election::LeaderElector;
use mailserver_controller::runtime::watch_loop::{
    begin_shutdown, run_watch_loop, spawn_shutdown_listener,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    let cancel = init.reconciler.cancel.clone();
    let server_state = Arc::clone(&init.server_state);
    spawn_shutdown_listener(Arc::clone(&server_state), cancel.clone());

    if !init.config.leader_election {
        return run_watch_loop(init.client, init.reconciler, init.server_state, init.config).await;
    }

    let identity = init
        .config
        .pod_name
        .clone()
        .ok_or_else(|| anyhow!("leader election needs POD_NAME or HOSTNAME"))?;
    let elector = Arc::new(LeaderElector::new(
        init.client.clone(),
        LEADER_LEASE_NAME,
        &init.config.controller_namespace,
        &identity,
    ));

    let mut guard = tokio::select! {
        guard = elector.acquire() => guard,
        () = cancel.cancelled() => {
            info!("Shutdown requested while waiting for leadership");
            return Ok(());
        }
    };

    let result = tokio::select! {
        res = run_watch_loop(init.client, init.reconciler, init.server_state, init.config) => res,
        () = guard.lost() => {
            begin_shutdown(&server_state, &cancel);
            Err(anyhow!("leader lease {LEADER_LEASE_NAME} lost"))
        }
    };

    if result.is_ok() {
        if let Err(e) = guard.release().await {
            warn!(error = %e, "Failed to release leader lease");
        }
    }
    result
}
