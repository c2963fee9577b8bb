//! # MailServer Status
//!
//! Observed facts recorded by the controller, one field per write.

use serde::{Deserialize, Serialize};

/// Status of the `MailServer` resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MailServerStatus {
    /// Domain bound on the first reconcile. Renames are rejected once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Available replicas of the mail workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Label selector of the mail workload, used by the scale subresource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Capacity reported by the data volume claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<String>,
    /// External address published in the A record
    #[serde(rename = "loadBalancerIP", default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_ip: Option<String>,
    /// Whether the autoconfig objects are currently deployed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_config: Option<bool>,
    /// Whether autoconfig is routed through Traefik objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traefik: Option<bool>,
}
