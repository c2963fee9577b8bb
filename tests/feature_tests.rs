//! Feature Tests
//!
//! Spec changes that add or remove whole groups of objects:
//! - disabling autoconfig retires its objects
//! - Traefik routes replace the plain ingress
//! - LDAP bind credentials are required when LDAP is on, and a broken
//!   reference is retried with growing delays until it is fixed

mod common;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::*;
use kube::runtime::controller::Action;
use mailserver_controller::controller::reconciler::{
    reconcile, Outcome, PendingReason, ReconcilerError,
};
use mailserver_controller::controller::registry::ResourceKind;
use mailserver_controller::controller::store::StoreError;
use mailserver_controller::runtime::error_policy::handle_reconciliation_error;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn ldap_spec() -> serde_json::Value {
    json!({
        "features": {
            "ldap": {
                "enabled": true,
                "host": "ldap.example.com",
                "bindSecret": "ldap-bind",
                "searchBase": "dc=example,dc=com",
                "userFilter": "(mail=%s)"
            }
        }
    })
}

fn bind_secret(data: serde_json::Value) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {"name": "ldap-bind", "namespace": NAMESPACE},
        "data": data,
    })
}

#[tokio::test]
async fn test_disabling_autoconfig_retires_its_objects() {
    let h = Harness::new(json!({}));
    h.converge().await;
    assert!(h.value(ResourceKind::Deployment, "autoconfig-example-com").is_some());

    h.edit(json!({"spec": {"autoconfig": {"enabled": false}}})).await;
    let outcomes = h.settle().await.unwrap();
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == Outcome::Pending(PendingReason::ObjectsRetired))
            .count(),
        1,
        "{outcomes:?}"
    );
    assert_eq!(outcomes.last(), Some(&Outcome::Converged));

    for kind in [
        ResourceKind::Deployment,
        ResourceKind::Service,
        ResourceKind::Certificate,
        ResourceKind::Ingress,
    ] {
        assert!(h.value(kind, "autoconfig-example-com").is_none(), "{kind}");
    }
    assert!(h.value(ResourceKind::Deployment, "mail-example-com").is_some());
    assert_eq!(h.mail_server().status.unwrap().auto_config, Some(false));

    h.store.clear_writes();
    assert_eq!(h.pass().await.unwrap(), Outcome::Converged);
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn test_disabling_autoconfig_behind_traefik_writes_one_flag_per_pass() {
    let h = Harness::new(json!({"traefik": {"crds": true}}));
    h.converge().await;
    assert!(h.value(ResourceKind::IngressRoute, "autoconfig-example-com").is_some());

    h.edit(json!({"spec": {"autoconfig": {"enabled": false}}})).await;
    let outcomes = h.settle().await.unwrap();
    assert_eq!(
        outcomes,
        vec![
            Outcome::Pending(PendingReason::ObjectsRetired),
            Outcome::Pending(PendingReason::FeatureStatus),
            Outcome::Pending(PendingReason::FeatureStatus),
            Outcome::Converged,
        ]
    );
    assert!(h.value(ResourceKind::IngressRoute, "autoconfig-example-com").is_none());
    assert!(h.value(ResourceKind::IngressRoute, "autoconfig-example-com-tls").is_none());
    let status = h.mail_server().status.unwrap();
    assert_eq!(status.auto_config, Some(false));
    assert_eq!(status.traefik, Some(false));
}

#[tokio::test]
async fn test_traefik_routes_replace_the_ingress() {
    let h = Harness::new(json!({}));
    h.converge().await;
    assert!(h.value(ResourceKind::Ingress, "autoconfig-example-com").is_some());

    h.edit(json!({"spec": {"traefik": {"crds": true}}})).await;
    let outcomes = h.settle().await.unwrap();
    assert_eq!(outcomes.last(), Some(&Outcome::Converged), "{outcomes:?}");

    assert!(h.value(ResourceKind::Ingress, "autoconfig-example-com").is_none());
    assert!(h.value(ResourceKind::IngressRoute, "autoconfig-example-com").is_some());
    assert!(h.value(ResourceKind::IngressRoute, "autoconfig-example-com-tls").is_some());
    assert_eq!(h.mail_server().status.unwrap().traefik, Some(true));
}

#[tokio::test]
async fn test_ldap_bind_credentials_are_read() {
    let h = Harness::new(ldap_spec());
    h.store
        .insert(
            ResourceKind::Secret,
            bind_secret(json!({
                // cn=admin,dc=example,dc=com / s3cret
                "bindDN": "Y249YWRtaW4sZGM9ZXhhbXBsZSxkYz1jb20=",
                "bindPW": "czNjcmV0"
            })),
        )
        .unwrap();

    let outcomes = h.settle().await.unwrap();
    assert_eq!(
        outcomes.last(),
        Some(&Outcome::Pending(PendingReason::AwaitingAddress))
    );
    let config = h.value(ResourceKind::Secret, "config-example-com").unwrap();
    let decode = |field: &str| {
        let encoded = config["data"][field].as_str().unwrap();
        String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap()
    };
    assert_eq!(decode("LDAP_BIND_DN"), "cn=admin,dc=example,dc=com");
    assert_eq!(decode("LDAP_BIND_PW"), "s3cret");
}

#[tokio::test]
async fn test_ldap_missing_bind_password_is_a_config_error() {
    let h = Harness::new(ldap_spec());
    h.store
        .insert(
            ResourceKind::Secret,
            bind_secret(json!({"bindDN": "Y249YWRtaW4sZGM9ZXhhbXBsZSxkYz1jb20="})),
        )
        .unwrap();

    let err = h.settle().await.unwrap_err();
    match err {
        ReconcilerError::Config(message) => assert!(message.contains("bindPW"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.value(ResourceKind::Deployment, "mail-example-com").is_none());
}

#[tokio::test]
async fn test_ldap_missing_bind_secret_is_not_found() {
    let h = Harness::new(ldap_spec());

    let err = h.settle().await.unwrap_err();
    assert!(
        matches!(err, ReconcilerError::Store(StoreError::NotFound(ref key)) if key.name == "ldap-bind"),
        "{err}"
    );
}

#[tokio::test]
async fn test_ldap_without_bind_secret_name() {
    let h = Harness::new(json!({"features": {"ldap": {"enabled": true, "host": "ldap.example.com"}}}));

    let err = h.settle().await.unwrap_err();
    assert!(matches!(err, ReconcilerError::Config(_)), "{err}");
}

#[tokio::test]
async fn test_configuration_errors_back_off_until_fixed() {
    let h = Harness::new(ldap_spec());
    let err = h.settle().await.unwrap_err();
    let ctx = Arc::new(h.ctx.clone());
    let ms = Arc::new(h.mail_server());

    let delays: Vec<Action> = (0..3)
        .map(|_| handle_reconciliation_error(Arc::clone(&ms), &err, Arc::clone(&ctx)))
        .collect();
    assert_eq!(
        delays,
        vec![
            Action::requeue(Duration::from_secs(5)),
            Action::requeue(Duration::from_secs(5)),
            Action::requeue(Duration::from_secs(10)),
        ]
    );

    h.store
        .insert(
            ResourceKind::Secret,
            bind_secret(json!({"bindDN": "Y249YWRtaW4=", "bindPW": "czNjcmV0"})),
        )
        .unwrap();
    reconcile(Arc::clone(&ms), Arc::clone(&ctx)).await.unwrap();
    assert_eq!(
        handle_reconciliation_error(ms, &err, ctx),
        Action::requeue(Duration::from_secs(5))
    );
}
