//! # Leader Election
//!
//! Lease-based leader election for replicated controller deployments. Only
//! the replica holding the `coordination.k8s.io/v1` Lease runs the watch loop,
//! which keeps a single in-flight pass per `MailServer` across replicas.
//!
//! Writes carry the lease `resourceVersion`, so a competing update fails with
//! 409 Conflict instead of producing two leaders.

use crate::constants::{LEADER_LEASE_DURATION_SECS, LEADER_RENEW_SECS, LEADER_RETRY_SECS};
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LeaderElectionError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
}

/// What a replica may do with the lease it just read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseClaim {
    /// No lease yet, create it
    Create,
    /// We hold it, bump the renew time
    Renew,
    /// Expired or released by its holder, take it over
    TakeOver { transitions: i32 },
    /// Another replica holds a live lease
    HeldElsewhere(String),
}

/// Decide how `identity` can claim `lease` at `now`
#[must_use]
pub fn claim(lease: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseClaim {
    let Some(lease) = lease else {
        return LeaseClaim::Create;
    };
    let spec = lease.spec.as_ref();
    let holder = spec
        .and_then(|s| s.holder_identity.as_deref())
        .filter(|h| !h.is_empty());
    if holder == Some(identity) {
        return LeaseClaim::Renew;
    }
    let renewed = spec.and_then(|s| s.renew_time.as_ref());
    let duration = spec.and_then(|s| s.lease_duration_seconds);
    let expired = match (holder, renewed, duration) {
        (Some(_), Some(rt), Some(secs)) => {
            now > rt.0 + chrono::Duration::seconds(i64::from(secs))
        }
        _ => true,
    };
    match holder {
        Some(other) if !expired => LeaseClaim::HeldElsewhere(other.to_string()),
        _ => LeaseClaim::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0),
        },
    }
}

/// Leader elector over one named Lease
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
    retry_interval: Duration,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("lease_name", &self.lease_name)
            .field("namespace", &self.namespace)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl LeaderElector {
    #[must_use]
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            lease_duration: Duration::from_secs(LEADER_LEASE_DURATION_SECS),
            renew_interval: Duration::from_secs(LEADER_RENEW_SECS),
            retry_interval: Duration::from_secs(LEADER_RETRY_SECS),
        }
    }

    fn api(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Block until the lease is ours, then keep renewing it in the background
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(identity = %self.identity, lease = %self.lease_name, "Waiting for leadership...");
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Leadership acquired");
                    return self.guard();
                }
                Ok(false) => {
                    debug!(identity = %self.identity, "Lease held by another replica, waiting...");
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Failed to acquire lease");
                }
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    fn guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move { elector.renewal_loop(lost_tx).await });
        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api = self.api();
        let now = Utc::now();
        let existing = match api.get(&self.lease_name).await {
            Ok(lease) => Some(lease),
            Err(kube::Error::Api(e)) if e.code == 404 => None,
            Err(e) => return Err(e.into()),
        };

        let (lease, post) = match claim(existing.as_ref(), &self.identity, now) {
            LeaseClaim::HeldElsewhere(holder) => {
                debug!(identity = %self.identity, holder = %holder, "Lease is held");
                return Ok(false);
            }
            LeaseClaim::Create => (self.fresh_lease(None, now, 0), true),
            LeaseClaim::Renew => {
                let mut lease = existing.unwrap_or_default();
                self.resource_version(&lease)?;
                if let Some(spec) = lease.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                }
                (lease, false)
            }
            LeaseClaim::TakeOver { transitions } => {
                let rv = existing
                    .as_ref()
                    .map(|l| self.resource_version(l))
                    .transpose()?;
                (self.fresh_lease(rv, now, transitions + 1), false)
            }
        };

        let result = if post {
            api.create(&PostParams::default(), &lease).await
        } else {
            api.replace(&self.lease_name, &PostParams::default(), &lease).await
        };
        match result {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "Lease update conflict");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn resource_version(&self, lease: &Lease) -> Result<String, LeaderElectionError> {
        lease
            .metadata
            .resource_version
            .clone()
            .ok_or_else(|| LeaderElectionError::MissingResourceVersion(self.lease_name.clone()))
    }

    fn fresh_lease(
        &self,
        resource_version: Option<String>,
        now: DateTime<Utc>,
        transitions: i32,
    ) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version,
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: i32::try_from(self.lease_duration.as_secs()).ok(),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(self.renew_interval).await;
            match self.try_acquire_or_renew().await {
                Ok(true) => debug!(identity = %self.identity, "Lease renewed"),
                Ok(false) | Err(_) => {
                    warn!(identity = %self.identity, "Leadership lost");
                    let _ = lost_tx.send(());
                    return;
                }
            }
        }
    }

    /// Clear the holder so a standby can take over without waiting for expiry
    async fn release(&self) -> Result<(), LeaderElectionError> {
        let api = self.api();
        let mut lease = match api.get(&self.lease_name).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if claim(Some(&lease), &self.identity, Utc::now()) != LeaseClaim::Renew {
            return Ok(());
        }
        if let Some(spec) = lease.spec.as_mut() {
            spec.holder_identity = None;
            spec.renew_time = None;
        }
        api.replace(&self.lease_name, &PostParams::default(), &lease).await?;
        info!(identity = %self.identity, "Lease released");
        Ok(())
    }
}

/// Held while this replica leads; renewal stops when dropped
#[derive(Debug)]
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Wait until a renewal fails
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Hand the lease back on graceful shutdown
    pub async fn release(self) -> Result<(), LeaderElectionError> {
        self.renewal_task.abort();
        self.elector.release().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(holder: Option<&str>, renewed: DateTime<Utc>, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some("ee12b95d.mail.linka.cloud".to_string()),
                resource_version: Some("42".to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: holder.map(str::to_string),
                lease_duration_seconds: Some(30),
                renew_time: Some(MicroTime(renewed)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_missing_lease_is_created() {
        assert_eq!(claim(None, "controller-0", Utc::now()), LeaseClaim::Create);
    }

    #[test]
    fn test_own_lease_is_renewed() {
        let now = Utc::now();
        let held = lease(Some("controller-0"), now, 3);
        assert_eq!(claim(Some(&held), "controller-0", now), LeaseClaim::Renew);
    }

    #[test]
    fn test_live_lease_of_another_replica_is_respected() {
        let now = Utc::now();
        let held = lease(Some("controller-1"), now - chrono::Duration::seconds(10), 3);
        assert_eq!(
            claim(Some(&held), "controller-0", now),
            LeaseClaim::HeldElsewhere("controller-1".to_string())
        );
    }

    #[test]
    fn test_expired_lease_is_taken_over() {
        let now = Utc::now();
        let stale = lease(Some("controller-1"), now - chrono::Duration::seconds(31), 3);
        assert_eq!(
            claim(Some(&stale), "controller-0", now),
            LeaseClaim::TakeOver { transitions: 3 }
        );
    }

    #[test]
    fn test_released_lease_is_taken_over_at_once() {
        let now = Utc::now();
        let mut released = lease(None, now, 4);
        if let Some(spec) = released.spec.as_mut() {
            spec.renew_time = None;
        }
        assert_eq!(
            claim(Some(&released), "controller-0", now),
            LeaseClaim::TakeOver { transitions: 4 }
        );
    }
}
