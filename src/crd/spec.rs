//! # MailServer Spec
//!
//! The user-facing resource: one `MailServer` per mail domain.

use crate::crd::cert::IssuerRef;
use crate::crd::MailServerStatus;
use k8s_openapi::api::apps::v1::DeploymentStrategy;
use k8s_openapi::api::core::v1::{
    Affinity, EnvVar, PodSecurityContext, ResourceRequirements, Toleration,
    TopologySpreadConstraint, Volume, VolumeMount,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_MAILSERVER_IMAGE: &str = "docker.io/mailserver/docker-mailserver:9.1.0";
pub const DEFAULT_AUTOCONFIG_IMAGE: &str = "docker.io/linkacloud/autoconfig:latest";
pub const DEFAULT_DMARC: &str = "v=DMARC1; p=reject; rua=mailto:dmarc@{{ .Domain }}; ruf=mailto:dmarc@{{ .Domain }}; fo=0; adkim=r; aspf=r; pct=100; rf=afrf; ri=86400; sp=quarantine";

/// MailServer Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: mail.linka.cloud/v1alpha1
/// kind: MailServer
/// metadata:
///   name: example
///   namespace: mail
/// spec:
///   domain: example.com
///   issuerRef:
///     name: letsencrypt
///     kind: ClusterIssuer
///   features:
///     spamassassin: true
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "MailServer",
    group = "mail.linka.cloud",
    version = "v1alpha1",
    plural = "mailservers",
    namespaced,
    status = "MailServerStatus",
    shortname = "ms",
    shortname = "mail",
    scale = r#"{"specReplicasPath":".spec.replicas","statusReplicasPath":".status.replicas","labelSelectorPath":".status.selector"}"#,
    printcolumn = r#"{"name":"Domain", "type":"string", "jsonPath":".status.domain"}, {"name":"Capacity", "type":"string", "jsonPath":".status.volumeSize"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}, {"name":"IP", "type":"string", "priority":1, "jsonPath":".status.loadBalancerIP"}, {"name":"Image", "type":"string", "priority":1, "jsonPath":".spec.image"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MailServerSpec {
    /// Mail domain. Bound into status on first reconcile and immutable afterwards.
    pub domain: String,
    /// Explicit SPF value. When empty the controller discovers the public address
    /// of the workload and publishes `v=spf1 a mx ip4:<ip> -all`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spf: Option<String>,
    /// DMARC value, `{{ .Domain }}` is replaced by the domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dmarc: Option<String>,
    /// docker-mailserver image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(flatten)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub autoconfig: AutoConfigDeployment,
    /// Address requested from the load balancer
    #[serde(rename = "loadBalancerIP", default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_class: Option<String>,
    /// Address published in the A record instead of the load balancer one
    #[serde(rename = "overrideIP", default, skip_serializing_if = "Option::is_none")]
    pub override_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0))]
    pub replicas: Option<i32>,
    #[serde(rename = "dnsTTL", default, skip_serializing_if = "Option::is_none")]
    pub dns_ttl: Option<u32>,
    pub issuer_ref: IssuerRef,
    #[serde(default)]
    pub volume: VolumeConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traefik: Option<TraefikConfig>,
}

/// Pod-level settings shared by the mail and autoconfig workloads
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<DeploymentStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topology_spread_constraints: Vec<TopologySpreadConstraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

/// docker-mailserver feature toggles
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spoof_protection: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pop3: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clamav: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amavis: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail2ban: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manage_sieve: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quotas: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spamassassin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spamassassin_kam: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgrey: Option<bool>,
    #[serde(default)]
    pub ldap: LdapConfig,
}

/// LDAP account provisioning against an Active Directory like server
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LdapConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Host without scheme, only TLS and StartTLS are supported
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(rename = "startTLS", default)]
    pub start_tls: bool,
    /// DNS server used by the mail pod to resolve the LDAP host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nameserver: Option<String>,
    /// Secret holding `bindDN` and `bindPW`
    #[serde(default)]
    pub bind_secret: String,
    #[serde(default)]
    pub search_base: String,
    #[serde(default)]
    pub user_filter: String,
}

/// Autoconfig / autodiscover companion workload
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoConfigDeployment {
    /// Defaults to true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(flatten)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Mail data volume
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(default = "default_volume_size")]
    pub size: String,
    #[serde(default = "default_access_mode")]
    pub access_mode: String,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            storage_class: None,
            size: default_volume_size(),
            access_mode: default_access_mode(),
        }
    }
}

fn default_volume_size() -> String {
    "1Gi".to_string()
}

fn default_access_mode() -> String {
    "ReadWriteMany".to_string()
}

/// Traefik integration for the autoconfig routes
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraefikConfig {
    /// Use Traefik IngressRoute/Middleware objects instead of a plain Ingress
    #[serde(default)]
    pub crds: bool,
    #[serde(default)]
    pub entrypoints: TraefikEntrypoints,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraefikEntrypoints {
    #[serde(default = "default_http_entrypoint")]
    pub http: String,
    #[serde(default = "default_https_entrypoint")]
    pub https: String,
}

impl Default for TraefikEntrypoints {
    fn default() -> Self {
        Self {
            http: default_http_entrypoint(),
            https: default_https_entrypoint(),
        }
    }
}

fn default_http_entrypoint() -> String {
    "web".to_string()
}

fn default_https_entrypoint() -> String {
    "websecure".to_string()
}

impl MailServerSpec {
    #[must_use]
    pub fn image(&self) -> &str {
        self.image
            .as_deref()
            .filter(|i| !i.is_empty())
            .unwrap_or(DEFAULT_MAILSERVER_IMAGE)
    }

    #[must_use]
    pub fn autoconfig_image(&self) -> &str {
        self.autoconfig
            .image
            .as_deref()
            .filter(|i| !i.is_empty())
            .unwrap_or(DEFAULT_AUTOCONFIG_IMAGE)
    }

    #[must_use]
    pub fn replicas(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }

    #[must_use]
    pub fn autoconfig_enabled(&self) -> bool {
        self.autoconfig.enabled.unwrap_or(true)
    }

    /// Whether autoconfig is routed through Traefik CRDs
    #[must_use]
    pub fn traefik_crds(&self) -> bool {
        self.traefik.as_ref().is_some_and(|t| t.crds)
    }

    #[must_use]
    pub fn ldap_enabled(&self) -> bool {
        self.features.ldap.enabled
    }

    /// Explicit SPF value, empty strings count as unset
    #[must_use]
    pub fn explicit_spf(&self) -> Option<&str> {
        self.spf.as_deref().filter(|s| !s.is_empty())
    }
}
