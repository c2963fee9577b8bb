//! Reconcile lifecycle tests
//!
//! Full passes against the in-memory store:
//! - bootstrap order, one write per pass
//! - idempotence once converged
//! - ownership of dependent objects
//! - domain binding and rename rejection
//! - deletion through the finalizer

mod common;

use common::*;
use kube::runtime::controller::Action;
use mailserver_controller::constants::FINALIZER;
use mailserver_controller::controller::reconciler::{
    next_action, reconcile, Outcome, PendingReason, ReconcilerError,
};
use mailserver_controller::controller::registry::ResourceKind;
use mailserver_controller::controller::store::{ObjectStore, WriteOp};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_bootstrap_runs_one_write_per_pass() {
    let h = Harness::new(json!({}));

    let outcomes = h.settle().await.unwrap();
    assert_eq!(
        outcomes,
        vec![
            Outcome::Pending(PendingReason::FinalizerAdded),
            Outcome::Pending(PendingReason::DomainBound),
            Outcome::Pending(PendingReason::CredentialsCreated),
            Outcome::Pending(PendingReason::ObjectsChanged),
            Outcome::Pending(PendingReason::FeatureStatus),
            Outcome::Pending(PendingReason::FeatureStatus),
            Outcome::Pending(PendingReason::AwaitingAddress),
        ]
    );

    let ms = h.mail_server();
    assert!(ms.metadata.finalizers.unwrap().contains(&FINALIZER.to_string()));
    let status = ms.status.unwrap();
    assert_eq!(status.domain.as_deref(), Some("example.com"));
    assert_eq!(status.auto_config, Some(true));
    assert_eq!(status.traefik, Some(false));
    assert!(h.value(ResourceKind::Secret, "postmaster-example-com").is_some());
    assert!(h.value(ResourceKind::Deployment, "mail-example-com").is_some());
    assert!(h.value(ResourceKind::Ingress, "autoconfig-example-com").is_some());
    assert!(h.value(ResourceKind::IngressRoute, "autoconfig-example-com").is_none());
}

#[tokio::test]
async fn test_address_then_workload_then_records() {
    let h = Harness::new(json!({}));
    h.settle().await.unwrap();

    h.publish_address(PUBLIC_IP);
    let outcomes = h.settle().await.unwrap();
    assert_eq!(
        outcomes,
        vec![
            Outcome::Pending(PendingReason::AddressRecorded),
            Outcome::Pending(PendingReason::AddressRecordChanged),
            Outcome::Pending(PendingReason::ReplicasObserved),
            Outcome::Pending(PendingReason::ReplicasObserved),
            Outcome::Pending(PendingReason::WorkloadNotReady),
        ]
    );
    let a = h.value(ResourceKind::DnsRecord, "mail-example-com").unwrap();
    assert_eq!(a["spec"]["a"]["target"], json!(PUBLIC_IP));
    let status = h.mail_server().status.unwrap();
    assert_eq!(status.load_balancer_ip.as_deref(), Some(PUBLIC_IP));
    assert_eq!(status.replicas, Some(0));
    assert!(status.selector.is_some_and(|s| s.contains('=')));

    h.set_available(1);
    h.bind_volume("10Gi");
    h.start_pod("Running");
    let outcomes = h.settle().await.unwrap();
    assert_eq!(
        outcomes,
        vec![
            Outcome::Pending(PendingReason::ReplicasObserved),
            Outcome::Pending(PendingReason::VolumeObserved),
            Outcome::Pending(PendingReason::SpfUpdated),
            Outcome::Pending(PendingReason::DkimUpdated),
            Outcome::Converged,
        ]
    );
    let status = h.mail_server().status.unwrap();
    assert_eq!(status.replicas, Some(1));
    assert_eq!(status.volume_size.as_deref(), Some("10Gi"));
}

#[tokio::test]
async fn test_override_address_wins_over_load_balancer() {
    const OVERRIDE_IP: &str = "198.51.100.9";
    let h = Harness::new(json!({ "overrideIP": OVERRIDE_IP }));

    let outcomes = h.settle().await.unwrap();
    assert!(!outcomes.contains(&Outcome::Pending(PendingReason::AwaitingAddress)));
    let recorded = outcomes
        .iter()
        .position(|o| *o == Outcome::Pending(PendingReason::AddressRecorded))
        .expect("address recorded without a load balancer");
    assert_eq!(
        outcomes[recorded + 1],
        Outcome::Pending(PendingReason::AddressRecordChanged)
    );
    assert_eq!(
        outcomes.last(),
        Some(&Outcome::Pending(PendingReason::WorkloadNotReady))
    );
    let a = h.value(ResourceKind::DnsRecord, "mail-example-com").unwrap();
    assert_eq!(a["spec"]["a"]["target"], json!(OVERRIDE_IP));

    h.publish_address(PUBLIC_IP);
    h.settle().await.unwrap();
    let status = h.mail_server().status.unwrap();
    assert_eq!(status.load_balancer_ip.as_deref(), Some(OVERRIDE_IP));
    let a = h.value(ResourceKind::DnsRecord, "mail-example-com").unwrap();
    assert_eq!(a["spec"]["a"]["target"], json!(OVERRIDE_IP));
}

#[tokio::test]
async fn test_converged_pass_writes_nothing() {
    let h = Harness::new(json!({}));
    h.converge().await;
    h.store.clear_writes();

    assert_eq!(h.pass().await.unwrap(), Outcome::Converged);
    assert_eq!(h.pass().await.unwrap(), Outcome::Converged);
    assert_eq!(h.store.writes(), vec![]);
}

#[tokio::test]
async fn test_dependents_are_owned_except_the_volume() {
    let h = Harness::new(json!({}));
    h.converge().await;
    let uid = h.mail_server().metadata.uid.unwrap();

    for kind in [
        ResourceKind::Secret,
        ResourceKind::ConfigMap,
        ResourceKind::Deployment,
        ResourceKind::Service,
        ResourceKind::Certificate,
        ResourceKind::DnsRecord,
        ResourceKind::Ingress,
    ] {
        for key in h.store.keys(kind) {
            let value = h.store.value(&key).unwrap();
            let owners = &value["metadata"]["ownerReferences"];
            assert_eq!(owners[0]["uid"], json!(uid), "{key} is not owned");
            assert_eq!(owners[0]["controller"], json!(true), "{key}");
            assert_eq!(owners[0]["kind"], json!("MailServer"), "{key}");
        }
    }
    let claim = h.value(ResourceKind::PersistentVolumeClaim, "example-com-data").unwrap();
    assert!(claim["metadata"].get("ownerReferences").is_none());
}

#[tokio::test]
async fn test_drifted_object_is_restored() {
    let h = Harness::new(json!({}));
    h.converge().await;

    let mx = key(ResourceKind::DnsRecord, "mx-example-com");
    h.store
        .merge(&mx, &json!({"spec": {"mx": {"target": "attacker.example.net."}}}))
        .await
        .unwrap();
    h.store.clear_writes();

    assert_eq!(
        h.pass().await.unwrap(),
        Outcome::Pending(PendingReason::ObjectsChanged)
    );
    assert_eq!(h.store.writes(), vec![(WriteOp::Apply, mx.clone())]);
    assert_eq!(
        h.store.value(&mx).unwrap()["spec"]["mx"]["target"],
        json!("mail.example.com.")
    );
    assert_eq!(h.pass().await.unwrap(), Outcome::Converged);
}

#[tokio::test]
async fn test_domain_rename_is_rejected_without_writes() {
    let h = Harness::new(json!({}));
    h.converge().await;
    h.edit(json!({"spec": {"domain": "example.org"}})).await;

    let err = h.pass().await.unwrap_err();
    match err {
        ReconcilerError::DomainImmutable { bound, requested } => {
            assert_eq!(bound, "example.com");
            assert_eq!(requested, "example.org");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn test_deletion_releases_the_finalizer() {
    let h = Harness::new(json!({}));
    h.settle().await.unwrap();

    assert!(h.store.delete(&h.key).await.unwrap());
    assert!(h.store.value(&h.key).is_some());
    h.store.clear_writes();

    assert_eq!(h.pass().await.unwrap(), Outcome::Stopped);
    assert_eq!(h.store.writes(), vec![(WriteOp::Merge, h.key.clone())]);
    assert!(h.store.value(&h.key).is_none());
    assert_eq!(h.pass().await.unwrap(), Outcome::Stopped);
}

#[tokio::test]
async fn test_requeue_actions() {
    let h = Harness::new(json!({}));
    let config = h.ctx.config.clone();

    assert_eq!(next_action(&h.ctx, Outcome::Stopped), Action::await_change());
    assert_eq!(
        next_action(&h.ctx, Outcome::Pending(PendingReason::DomainBound)),
        Action::requeue(config.change_requeue())
    );
    assert_eq!(
        next_action(&h.ctx, Outcome::Pending(PendingReason::AwaitingAddress)),
        Action::requeue(config.pending_requeue())
    );
    assert_eq!(
        next_action(&h.ctx, Outcome::Converged),
        Action::requeue(config.resync_interval())
    );

    let ctx = Arc::new(h.ctx.clone());
    let action = reconcile(Arc::new(h.mail_server()), ctx).await.unwrap();
    assert_eq!(action, Action::requeue(config.change_requeue()));
}

#[tokio::test]
async fn test_every_requeue_is_backed_by_a_write() {
    let h = Harness::new(json!({}));

    for _ in 0..30 {
        let before = h.store.write_count();
        let outcome = h.pass().await.unwrap();
        let wrote = h.store.write_count() > before;
        match outcome {
            Outcome::Pending(PendingReason::AwaitingAddress) => {
                assert!(!wrote);
                h.publish_address(PUBLIC_IP);
            }
            Outcome::Pending(PendingReason::WorkloadNotReady) => {
                assert!(!wrote);
                h.set_available(1);
                h.bind_volume("10Gi");
                h.start_pod("Running");
            }
            Outcome::Pending(reason) => assert!(wrote, "{reason} without a write"),
            Outcome::Converged => {
                assert!(!wrote);
                return;
            }
            Outcome::Stopped => panic!("unexpected stop"),
        }
    }
    panic!("never converged");
}
