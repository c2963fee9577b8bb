//! # Reconcile
//!
//! Drives one `MailServer` toward convergence. A pass loads the resource,
//! then runs the phases of [`Phase::ALL`] in order and stops at the first one
//! that does not complete: after a write (the next pass observes its effect),
//! while waiting on the cluster (no address, no running pod), or on error.
//! A pass that reaches the end wrote nothing.

use super::apply::{self, converge};
use super::dkim;
use super::extract::{exec_in_workload, typed, Extraction};
use super::finalizer;
use super::status;
use super::steps::{Outcome, PendingReason, Phase, StepOutcome};
use super::types::{Reconciler, ReconcilerError};
use crate::constants::{DKIM_KEY_DIR, LDAP_BIND_DN_KEY, LDAP_BIND_PW_KEY, PUBLIC_IP_COMMAND};
use crate::controller::registry::ResourceKind;
use crate::controller::resources::{self, dns, LdapCredentials, Names, TargetObject, TargetSet};
use crate::controller::store::{label_selector, ObjectKey, StoreError};
use crate::crd::{Defaulting, DnsRecord, MailServer, MailServerStatus};
use crate::observability::metrics;
use anyhow::anyhow;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// `namespace/name`, the key backoff state is tracked under
#[must_use]
pub fn resource_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Entry point for the controller runtime
pub async fn reconcile(
    ms: Arc<MailServer>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let namespace = ms.namespace().unwrap_or_default();
    let name = ms.name_any();
    let key = ObjectKey::new(ResourceKind::MailServer, namespace.as_str(), name.as_str());

    metrics::increment_reconciliations();
    let start = Instant::now();
    let result = reconcile_key(&ctx, &key).await;
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    let outcome = result?;
    ctx.reset_backoff(&resource_key(&namespace, &name));
    Ok(next_action(&ctx, outcome))
}

/// When to come back after a pass
#[must_use]
pub fn next_action(ctx: &Reconciler, outcome: Outcome) -> Action {
    match outcome {
        Outcome::Stopped => Action::await_change(),
        Outcome::Pending(reason) => {
            metrics::increment_requeues_total(reason.as_str());
            if reason.wrote() {
                Action::requeue(ctx.config.change_requeue())
            } else {
                Action::requeue(ctx.config.pending_requeue())
            }
        }
        Outcome::Converged => {
            metrics::increment_requeues_total("resync");
            Action::requeue(ctx.config.resync_interval())
        }
    }
}

/// Run one pass for the `MailServer` stored under `key`
pub async fn reconcile_key(ctx: &Reconciler, key: &ObjectKey) -> Result<Outcome, ReconcilerError> {
    let Some(obj) = ctx.store.get(key).await? else {
        debug!(resource = %key, "MailServer not found, nothing to do");
        return Ok(Outcome::Stopped);
    };
    let mut pass = Pass {
        ctx,
        key,
        ms: typed(obj)?,
        ldap: None,
        targets: None,
    };

    for phase in Phase::ALL {
        if ctx.cancel.is_cancelled() {
            return Err(ReconcilerError::Cancelled);
        }
        match pass.run(phase).await? {
            StepOutcome::Continue => debug!(resource = %key, phase = %phase, "phase complete"),
            StepOutcome::Pending(reason) => {
                info!(resource = %key, phase = %phase, reason = %reason, "reconcile.requeue");
                return Ok(Outcome::Pending(reason));
            }
            StepOutcome::Halt => return Ok(Outcome::Stopped),
        }
    }
    debug!(resource = %key, "reconcile.converged");
    Ok(Outcome::Converged)
}

/// State carried from one phase to the next within a pass
struct Pass<'a> {
    ctx: &'a Reconciler,
    key: &'a ObjectKey,
    ms: MailServer,
    ldap: Option<LdapCredentials>,
    targets: Option<TargetSet>,
}

fn pending(reason: PendingReason) -> Result<StepOutcome, ReconcilerError> {
    Ok(StepOutcome::Pending(reason))
}

impl Pass<'_> {
    async fn run(&mut self, phase: Phase) -> Result<StepOutcome, ReconcilerError> {
        match phase {
            Phase::Deletion => self.deletion().await,
            Phase::Finalizer => self.finalizer().await,
            Phase::Domain => self.domain().await,
            Phase::Ldap => self.ldap().await,
            Phase::Generate => self.generate(),
            Phase::Credentials => self.credentials().await,
            Phase::Apply => self.apply().await,
            Phase::Retire => self.retire().await,
            Phase::FeatureStatus => self.feature_status().await,
            Phase::Address => self.address().await,
            Phase::Replicas => self.replicas().await,
            Phase::Volume => self.volume().await,
            Phase::Spf => self.spf().await,
            Phase::Dkim => self.dkim().await,
        }
    }

    fn status(&self) -> MailServerStatus {
        self.ms.status.clone().unwrap_or_default()
    }

    fn namespace(&self) -> &str {
        &self.key.namespace
    }

    fn targets(&self) -> Result<&TargetSet, ReconcilerError> {
        self.targets
            .as_ref()
            .ok_or_else(|| anyhow!("target set used before generation").into())
    }

    fn owner(&self) -> Result<OwnerReference, ReconcilerError> {
        self.ms
            .controller_owner_ref(&())
            .ok_or_else(|| anyhow!("MailServer {} has no uid yet", self.key).into())
    }

    async fn deletion(&mut self) -> Result<StepOutcome, ReconcilerError> {
        if self.ms.metadata.deletion_timestamp.is_none() {
            return Ok(StepOutcome::Continue);
        }
        finalizer::remove(self.ctx, self.key, &self.ms).await?;
        Ok(StepOutcome::Halt)
    }

    async fn finalizer(&mut self) -> Result<StepOutcome, ReconcilerError> {
        if finalizer::add(self.ctx, self.key, &self.ms).await? {
            return pending(PendingReason::FinalizerAdded);
        }
        Ok(StepOutcome::Continue)
    }

    async fn domain(&mut self) -> Result<StepOutcome, ReconcilerError> {
        let requested = &self.ms.spec.domain;
        match self.status().domain.filter(|d| !d.is_empty()) {
            None => {
                status::set_field(self.ctx, self.key, "domain", requested).await?;
                pending(PendingReason::DomainBound)
            }
            Some(bound) if bound != *requested => Err(ReconcilerError::DomainImmutable {
                bound,
                requested: requested.clone(),
            }),
            Some(_) => Ok(StepOutcome::Continue),
        }
    }

    async fn ldap(&mut self) -> Result<StepOutcome, ReconcilerError> {
        if !self.ms.spec.ldap_enabled() {
            return Ok(StepOutcome::Continue);
        }
        let secret_name = &self.ms.spec.features.ldap.bind_secret;
        if secret_name.is_empty() {
            return Err(ReconcilerError::Config(
                "LDAP is enabled but no bind secret is set".to_string(),
            ));
        }
        let key = ObjectKey::new(ResourceKind::Secret, self.namespace(), secret_name.as_str());
        let Some(obj) = self.ctx.store.get(&key).await? else {
            return Err(StoreError::NotFound(key).into());
        };
        let secret: Secret = typed(obj)?;
        let data = secret.data.unwrap_or_default();
        let field = |name: &str| -> Result<String, ReconcilerError> {
            let value = data.get(name).ok_or_else(|| {
                ReconcilerError::Config(format!(
                    "{name} not found in LDAP bind credentials secret {secret_name}"
                ))
            })?;
            String::from_utf8(value.0.clone()).map_err(|_| {
                ReconcilerError::Config(format!(
                    "{name} in LDAP bind credentials secret {secret_name} is not valid UTF-8"
                ))
            })
        };
        self.ldap = Some(LdapCredentials::new(
            field(LDAP_BIND_DN_KEY)?,
            field(LDAP_BIND_PW_KEY)?,
        ));
        Ok(StepOutcome::Continue)
    }

    fn generate(&mut self) -> Result<StepOutcome, ReconcilerError> {
        let password = Zeroizing::new(resources::random_password());
        self.targets = Some(resources::generate(&self.ms, self.ldap.as_ref(), &password)?);
        Ok(StepOutcome::Continue)
    }

    async fn credentials(&mut self) -> Result<StepOutcome, ReconcilerError> {
        let target = &self.targets()?.credentials;
        let key = target.key()?;
        if self.ctx.store.get(&key).await?.is_some() {
            debug!(resource = %key, "credentials secret already exists");
            return Ok(StepOutcome::Continue);
        }
        let mut secret = target.object.clone();
        secret.metadata.owner_references = Some(vec![self.owner()?]);
        info!(resource = %key, "creating credentials secret");
        self.ctx.store.create(target.kind, &secret).await?;
        metrics::increment_objects_applied(target.kind.as_str());
        pending(PendingReason::CredentialsCreated)
    }

    async fn apply(&mut self) -> Result<StepOutcome, ReconcilerError> {
        let owner = self.owner()?;
        let mut changed = false;
        for target in self.targets()?.to_apply() {
            changed |= converge(self.ctx, &owner, target).await?.changed();
        }
        if changed {
            return pending(PendingReason::ObjectsChanged);
        }
        Ok(StepOutcome::Continue)
    }

    async fn retire(&mut self) -> Result<StepOutcome, ReconcilerError> {
        let mut deleted = false;
        for target in self.targets()?.to_retire() {
            deleted |= apply::retire(self.ctx, target).await?;
        }
        if deleted {
            return pending(PendingReason::ObjectsRetired);
        }
        Ok(StepOutcome::Continue)
    }

    async fn feature_status(&mut self) -> Result<StepOutcome, ReconcilerError> {
        let targets = self.targets()?;
        let (autoconfig, traefik) = (targets.autoconfig_enabled(), targets.traefik_enabled());
        let current = self.status();
        if current.auto_config != Some(autoconfig) {
            status::set_field(self.ctx, self.key, "autoConfig", autoconfig).await?;
            return pending(PendingReason::FeatureStatus);
        }
        if current.traefik != Some(traefik) {
            status::set_field(self.ctx, self.key, "traefik", traefik).await?;
            return pending(PendingReason::FeatureStatus);
        }
        Ok(StepOutcome::Continue)
    }

    async fn load_balancer_ip(&self) -> Result<Option<String>, ReconcilerError> {
        let Some(svc) = self.ctx.store.get(&self.targets()?.service).await? else {
            return Ok(None);
        };
        let svc: Service = typed(svc)?;
        Ok(svc
            .status
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .and_then(|ingress| ingress.into_iter().next())
            .and_then(|ingress| ingress.ip)
            .filter(|ip| !ip.is_empty()))
    }

    async fn address(&mut self) -> Result<StepOutcome, ReconcilerError> {
        let declared = self.ms.spec.override_ip.clone().filter(|ip| !ip.is_empty());
        let ip = match declared {
            Some(ip) => ip,
            None => match self.load_balancer_ip().await? {
                Some(ip) => ip,
                None => {
                    info!(resource = %self.key, "waiting for load balancer IP");
                    return pending(PendingReason::AwaitingAddress);
                }
            },
        };
        if self.status().load_balancer_ip.as_deref() != Some(ip.as_str()) {
            status::set_field(self.ctx, self.key, "loadBalancerIP", &ip).await?;
            return pending(PendingReason::AddressRecorded);
        }
        let record = TargetObject::new(dns::a_record(&self.ms, &ip))?;
        if converge(self.ctx, &self.owner()?, &record).await?.changed() {
            return pending(PendingReason::AddressRecordChanged);
        }
        Ok(StepOutcome::Continue)
    }

    async fn replicas(&mut self) -> Result<StepOutcome, ReconcilerError> {
        let Some(deploy) = self.ctx.store.get(&self.targets()?.deployment).await? else {
            return pending(PendingReason::WorkloadNotReady);
        };
        let deploy: Deployment = typed(deploy)?;
        let available = deploy
            .status
            .as_ref()
            .and_then(|s| s.available_replicas)
            .unwrap_or(0);
        let selector = deploy
            .spec
            .as_ref()
            .and_then(|s| s.selector.match_labels.as_ref())
            .map(label_selector)
            .unwrap_or_default();

        let current = self.status();
        if current.replicas != Some(available) {
            status::set_field(self.ctx, self.key, "replicas", available).await?;
            return pending(PendingReason::ReplicasObserved);
        }
        if current.selector.as_deref() != Some(selector.as_str()) {
            status::set_field(self.ctx, self.key, "selector", &selector).await?;
            return pending(PendingReason::ReplicasObserved);
        }
        Ok(StepOutcome::Continue)
    }

    async fn volume(&mut self) -> Result<StepOutcome, ReconcilerError> {
        let Some(claim) = self.ctx.store.get(&self.targets()?.claim).await? else {
            return Ok(StepOutcome::Continue);
        };
        let claim: PersistentVolumeClaim = typed(claim)?;
        let Some(size) = claim
            .status
            .and_then(|s| s.capacity)
            .and_then(|capacity| capacity.get("storage").map(|q| q.0.clone()))
        else {
            return Ok(StepOutcome::Continue);
        };
        if self.status().volume_size.as_deref() != Some(size.as_str()) {
            status::set_field(self.ctx, self.key, "volumeSize", &size).await?;
            return pending(PendingReason::VolumeObserved);
        }
        Ok(StepOutcome::Continue)
    }

    async fn spf(&mut self) -> Result<StepOutcome, ReconcilerError> {
        if self.ms.spec.explicit_spf().is_some() {
            return Ok(StepOutcome::Continue);
        }
        let targets = self.targets()?;
        let output = match exec_in_workload(self.ctx, &targets.deployment, PUBLIC_IP_COMMAND).await? {
            Extraction::Ready(out) if !out.trim().is_empty() => out,
            Extraction::Ready(_) => {
                debug!(resource = %self.key, "public address not known yet");
                return pending(PendingReason::WorkloadNotReady);
            }
            Extraction::NotReady(reason) => {
                debug!(resource = %self.key, reason = reason, "workload not ready for public address lookup");
                return pending(PendingReason::WorkloadNotReady);
            }
        };

        let value = dns::spf_value(&output);
        let Some(rec) = self.ctx.store.get(&targets.spf).await? else {
            return Err(StoreError::NotFound(targets.spf.clone()).into());
        };
        let rec: DnsRecord = typed(rec)?;
        let published = rec.spec.txt.and_then(|t| t.targets).unwrap_or_default();
        if published.concat() == value {
            return Ok(StepOutcome::Continue);
        }
        info!(resource = %targets.spf, spf = %value, "updating SPF record");
        let patch = json!({ "spec": { "txt": { "targets": [value] } } });
        self.ctx.store.merge(&targets.spf, &patch).await?;
        pending(PendingReason::SpfUpdated)
    }

    async fn dkim(&mut self) -> Result<StepOutcome, ReconcilerError> {
        let domain = self.ms.spec.domain.clone();
        let key = ObjectKey::new(
            ResourceKind::DnsRecord,
            self.namespace(),
            Names::new(&domain).record("dkim"),
        );
        let existing = self.ctx.store.get(&key).await?;

        let command = format!("cat {DKIM_KEY_DIR}/{domain}/mail.txt");
        let output = match exec_in_workload(self.ctx, &self.targets()?.deployment, &command).await? {
            Extraction::Ready(out) => out,
            Extraction::NotReady(reason) => {
                debug!(resource = %self.key, reason = reason, "workload not ready for DKIM key lookup");
                return pending(PendingReason::WorkloadNotReady);
            }
        };
        let rr = dkim::parse_txt(&output)?;

        let mut desired = dns::dkim_record(&self.ms, rr.strings);
        desired.apply_defaults();
        let live = existing.clone().map(typed::<DnsRecord>).transpose()?;
        let published = live.as_ref().and_then(|r| r.spec.txt.as_ref());
        let wanted = desired.spec.txt.as_ref();
        let joined = |targets: &Option<Vec<String>>| targets.as_ref().map(|t| t.join(" "));
        if let (Some(got), Some(want)) = (published, wanted) {
            if got.name == want.name && joined(&got.targets) == joined(&want.targets) {
                return Ok(StepOutcome::Continue);
            }
        }

        let mut record = TargetObject::new(desired)?;
        record.object.metadata.owner_references = Some(vec![self.owner()?]);
        match existing {
            None => {
                info!(resource = %key, "creating DKIM record");
                self.ctx.store.create(record.kind, &record.object).await?;
            }
            Some(live) => {
                info!(resource = %key, "updating DKIM record");
                record.object.metadata.resource_version = live.metadata.resource_version;
                self.ctx.store.replace(record.kind, &record.object).await?;
            }
        }
        metrics::increment_objects_applied(record.kind.as_str());
        pending(PendingReason::DkimUpdated)
    }
}
