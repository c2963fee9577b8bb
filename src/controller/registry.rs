//! # Kind Registry
//!
//! Maps every kind the controller touches to its API descriptor. Built once at
//! startup and handed to the store and the reconciler.

use crate::crd::{Certificate, DnsRecord, IngressRoute, MailServer, Middleware};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::core::{ApiResource, GroupVersionKind};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    MailServer,
    Secret,
    ConfigMap,
    Deployment,
    Service,
    PersistentVolumeClaim,
    Pod,
    Ingress,
    Certificate,
    DnsRecord,
    IngressRoute,
    Middleware,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 12] = [
        ResourceKind::MailServer,
        ResourceKind::Secret,
        ResourceKind::ConfigMap,
        ResourceKind::Deployment,
        ResourceKind::Service,
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::Pod,
        ResourceKind::Ingress,
        ResourceKind::Certificate,
        ResourceKind::DnsRecord,
        ResourceKind::IngressRoute,
        ResourceKind::Middleware,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::MailServer => "MailServer",
            ResourceKind::Secret => "Secret",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Service => "Service",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ResourceKind::Pod => "Pod",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::Certificate => "Certificate",
            ResourceKind::DnsRecord => "DNSRecord",
            ResourceKind::IngressRoute => "IngressRoute",
            ResourceKind::Middleware => "Middleware",
        }
    }

    /// Kinds served by an optional API group
    #[must_use]
    pub fn is_optional(self) -> bool {
        matches!(self, ResourceKind::IngressRoute | ResourceKind::Middleware)
    }

    fn api_resource(self) -> ApiResource {
        match self {
            ResourceKind::MailServer => ApiResource::erase::<MailServer>(&()),
            ResourceKind::Secret => ApiResource::erase::<Secret>(&()),
            ResourceKind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            ResourceKind::Deployment => ApiResource::erase::<Deployment>(&()),
            ResourceKind::Service => ApiResource::erase::<Service>(&()),
            ResourceKind::PersistentVolumeClaim => {
                ApiResource::erase::<PersistentVolumeClaim>(&())
            }
            ResourceKind::Pod => ApiResource::erase::<Pod>(&()),
            ResourceKind::Ingress => ApiResource::erase::<Ingress>(&()),
            ResourceKind::Certificate => ApiResource::erase::<Certificate>(&()),
            ResourceKind::DnsRecord => ApiResource::erase::<DnsRecord>(&()),
            ResourceKind::IngressRoute => ApiResource::erase::<IngressRoute>(&()),
            ResourceKind::Middleware => ApiResource::erase::<Middleware>(&()),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct KindEntry {
    api_resource: ApiResource,
    /// Not owned by the `MailServer`, survives its deletion
    retained: bool,
    available: bool,
}

/// Registry of the kinds the controller reads and writes
#[derive(Debug, Clone)]
pub struct KindRegistry {
    entries: BTreeMap<ResourceKind, KindEntry>,
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KindRegistry {
    /// All kinds, optional ones included
    #[must_use]
    pub fn new() -> Self {
        let entries = ResourceKind::ALL
            .iter()
            .map(|kind| {
                (
                    *kind,
                    KindEntry {
                        api_resource: kind.api_resource(),
                        retained: *kind == ResourceKind::PersistentVolumeClaim,
                        available: true,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Mark the Traefik kinds as served or not by the cluster
    #[must_use]
    pub fn with_traefik(mut self, available: bool) -> Self {
        for (kind, entry) in &mut self.entries {
            if kind.is_optional() {
                entry.available = available;
            }
        }
        self
    }

    #[must_use]
    pub fn api_resource(&self, kind: ResourceKind) -> Option<&ApiResource> {
        self.entries.get(&kind).map(|e| &e.api_resource)
    }

    #[must_use]
    pub fn gvk(&self, kind: ResourceKind) -> Option<GroupVersionKind> {
        self.api_resource(kind)
            .map(|ar| GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind))
    }

    /// Whether the kind stays behind when its `MailServer` is deleted
    #[must_use]
    pub fn is_retained(&self, kind: ResourceKind) -> bool {
        self.entries.get(&kind).is_some_and(|e| e.retained)
    }

    #[must_use]
    pub fn is_available(&self, kind: ResourceKind) -> bool {
        self.entries.get(&kind).is_some_and(|e| e.available)
    }

    /// Dependent kinds served by the cluster, for owner-based watches
    pub fn owned_kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.entries
            .iter()
            .filter(|(kind, e)| {
                e.available && !matches!(kind, ResourceKind::MailServer | ResourceKind::Pod)
            })
            .map(|(kind, _)| *kind)
    }
}
