//! # Resource Generation
//!
//! Pure functions mapping a `MailServer` to the objects it implies. Each
//! generator builds a typed object, which is then erased into a
//! [`TargetObject`] the apply engine can compare and patch without knowing
//! its kind.
//!
//! ## Module Structure
//!
//! - `naming.rs` - object names and labels
//! - `env.rs` - mail server environment table
//! - `mail.rs` - mail workload, service, claim, secrets, certificate
//! - `dns.rs` - DNS records
//! - `autoconfig.rs` - autoconfig workload and routing

pub mod autoconfig;
pub mod dns;
pub mod env;
pub mod mail;
pub mod naming;

pub use env::{LdapCredentials, MailConfig};
pub use naming::Names;

use crate::constants::CONFIG_SECRET_HASH_ANNOTATION;
use crate::controller::registry::ResourceKind;
use crate::controller::store::{ObjectKey, StoreError};
use crate::crd::{Certificate, Defaulting, DnsRecord, IngressRoute, MailServer, Middleware};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::ResourceExt;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A typed object the generator can produce
pub trait DesiredObject: Serialize {
    const KIND: ResourceKind;

    /// Normalization hook, only for kinds whose defaults the API server fills
    fn defaulting(&mut self) -> Option<&mut dyn Defaulting> {
        None
    }
}

impl DesiredObject for Secret {
    const KIND: ResourceKind = ResourceKind::Secret;
}

impl DesiredObject for ConfigMap {
    const KIND: ResourceKind = ResourceKind::ConfigMap;
}

impl DesiredObject for Deployment {
    const KIND: ResourceKind = ResourceKind::Deployment;
}

impl DesiredObject for Service {
    const KIND: ResourceKind = ResourceKind::Service;
}

impl DesiredObject for PersistentVolumeClaim {
    const KIND: ResourceKind = ResourceKind::PersistentVolumeClaim;
}

impl DesiredObject for Ingress {
    const KIND: ResourceKind = ResourceKind::Ingress;
}

impl DesiredObject for Certificate {
    const KIND: ResourceKind = ResourceKind::Certificate;
}

impl DesiredObject for IngressRoute {
    const KIND: ResourceKind = ResourceKind::IngressRoute;
}

impl DesiredObject for Middleware {
    const KIND: ResourceKind = ResourceKind::Middleware;
}

impl DesiredObject for DnsRecord {
    const KIND: ResourceKind = ResourceKind::DnsRecord;

    fn defaulting(&mut self) -> Option<&mut dyn Defaulting> {
        Some(self)
    }
}

/// A desired object, erased to its kind and JSON body
#[derive(Debug, Clone)]
pub struct TargetObject {
    pub kind: ResourceKind,
    pub object: DynamicObject,
}

impl TargetObject {
    /// Normalize (when the kind supports it) and erase a typed object
    pub fn new<T: DesiredObject>(mut obj: T) -> Result<Self, serde_json::Error> {
        if let Some(defaulting) = obj.defaulting() {
            defaulting.apply_defaults();
        }
        let object = serde_json::from_value(serde_json::to_value(&obj)?)?;
        Ok(Self {
            kind: T::KIND,
            object,
        })
    }

    pub fn key(&self) -> Result<ObjectKey, StoreError> {
        ObjectKey::of(self.kind, &self.object)
    }
}

/// Metadata shared by every generated object
pub(crate) fn object_meta(
    ms: &MailServer,
    name: String,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: ms.namespace(),
        labels: Some(labels),
        ..Default::default()
    }
}

/// 32 random bytes, unpadded standard base64
#[must_use]
pub fn random_password() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD_NO_PAD.encode(bytes)
}

/// Hex sha256 of the config secret data
pub fn config_hash(secret: &Secret) -> Result<String, serde_json::Error> {
    let data = serde_json::to_vec(&secret.data)?;
    Ok(format!("{:x}", Sha256::digest(data)))
}

/// Stamp the config hash on the pod template so a config change rolls the pods
pub fn set_config_hash(deploy: &mut Deployment, secret: &Secret) -> Result<(), serde_json::Error> {
    let hash = config_hash(secret)?;
    if let Some(template_meta) = deploy
        .spec
        .as_mut()
        .map(|spec| spec.template.metadata.get_or_insert_with(ObjectMeta::default))
    {
        template_meta
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(CONFIG_SECRET_HASH_ANNOTATION.to_string(), hash);
    }
    Ok(())
}

/// Every object a `MailServer` implies for one pass
#[derive(Debug, Clone)]
pub struct TargetSet {
    /// Created once, never patched
    pub credentials: TargetObject,
    /// Mail objects in apply order
    pub mail: Vec<TargetObject>,
    /// Autoconfig certificate, workload, service and SRV record
    pub autoconfig: Vec<TargetObject>,
    pub ingress: TargetObject,
    /// Redirect middleware, HTTP route, HTTPS route
    pub traefik: Vec<TargetObject>,
    pub deployment: ObjectKey,
    pub service: ObjectKey,
    pub claim: ObjectKey,
    pub spf: ObjectKey,
    autoconfig_enabled: bool,
    traefik_crds: bool,
}

impl TargetSet {
    /// Objects pushed through the apply engine, in order
    #[must_use]
    pub fn to_apply(&self) -> Vec<&TargetObject> {
        let mut objects: Vec<&TargetObject> = self.mail.iter().collect();
        if self.autoconfig_enabled {
            objects.extend(self.autoconfig.iter());
            if self.traefik_crds {
                objects.extend(self.traefik.iter());
            } else {
                objects.push(&self.ingress);
            }
        }
        objects
    }

    /// Objects that must not exist with the current feature selection
    #[must_use]
    pub fn to_retire(&self) -> Vec<&TargetObject> {
        if !self.autoconfig_enabled {
            let mut objects: Vec<&TargetObject> = self.autoconfig.iter().collect();
            objects.push(&self.ingress);
            objects.extend(self.traefik.iter());
            objects
        } else if self.traefik_crds {
            vec![&self.ingress]
        } else {
            self.traefik.iter().collect()
        }
    }

    #[must_use]
    pub fn autoconfig_enabled(&self) -> bool {
        self.autoconfig_enabled
    }

    /// Whether autoconfig is served through Traefik routes
    #[must_use]
    pub fn traefik_enabled(&self) -> bool {
        self.autoconfig_enabled && self.traefik_crds
    }
}

/// Build the target set of a `MailServer`.
///
/// `password` seeds the credentials secret, which is only ever created.
pub fn generate(
    ms: &MailServer,
    ldap: Option<&LdapCredentials>,
    password: &str,
) -> Result<TargetSet, serde_json::Error> {
    let config = mail::config_secret(ms, ldap);
    let mut deployment = mail::deployment(ms);
    set_config_hash(&mut deployment, &config)?;

    let mut mail_objects = vec![
        TargetObject::new(config)?,
        TargetObject::new(mail::certificate(ms))?,
        TargetObject::new(mail::data_claim(ms))?,
        TargetObject::new(deployment)?,
        TargetObject::new(mail::config_override(ms))?,
        TargetObject::new(mail::service(ms))?,
        TargetObject::new(dns::mx_record(ms))?,
        TargetObject::new(dns::spf_record(ms))?,
        TargetObject::new(dns::dmarc_record(ms))?,
    ];
    for (service, port) in dns::SRV_SERVICES {
        mail_objects.push(TargetObject::new(dns::srv_record(ms, service, port))?);
    }

    let names = Names::new(&ms.spec.domain);
    let namespace = ms.namespace().unwrap_or_default();
    let key = |kind: ResourceKind, name: String| ObjectKey::new(kind, namespace.as_str(), name);

    Ok(TargetSet {
        credentials: TargetObject::new(mail::credentials_secret(ms, password))?,
        mail: mail_objects,
        autoconfig: vec![
            TargetObject::new(autoconfig::certificate(ms))?,
            TargetObject::new(autoconfig::deployment(ms))?,
            TargetObject::new(autoconfig::service(ms))?,
            TargetObject::new(autoconfig::srv_record(ms))?,
        ],
        ingress: TargetObject::new(autoconfig::ingress(ms))?,
        traefik: vec![
            TargetObject::new(autoconfig::redirect_middleware(ms))?,
            TargetObject::new(autoconfig::http_route(ms))?,
            TargetObject::new(autoconfig::https_route(ms))?,
        ],
        deployment: key(ResourceKind::Deployment, names.mail()),
        service: key(ResourceKind::Service, names.mail()),
        claim: key(ResourceKind::PersistentVolumeClaim, names.data()),
        spf: key(ResourceKind::DnsRecord, names.record("spf")),
        autoconfig_enabled: ms.spec.autoconfig_enabled(),
        traefik_crds: ms.spec.traefik_crds(),
    })
}
