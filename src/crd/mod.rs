//! # Custom Resource Definitions
//!
//! The `MailServer` resource the controller reconciles, and the foreign
//! resources it writes on its behalf.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `MailServer` specification and default values
//! - `status.rs` - observed state recorded by the controller
//! - `cert.rs` - cert-manager `Certificate`
//! - `dns.rs` - `DNSRecord` (A, MX, TXT, SRV)
//! - `traefik.rs` - Traefik `IngressRoute` and `Middleware`

mod cert;
mod dns;
mod spec;
mod status;
mod traefik;

pub use cert::{Certificate, CertificateSpec, IssuerRef};
pub use dns::{fqdn, ARecord, DnsRecord, DnsRecordSpec, MxRecord, SrvRecord, TxtRecord};
pub use spec::{
    AutoConfigDeployment, DeploymentConfig, Features, IngressConfig, LdapConfig, MailServer,
    MailServerSpec, TraefikConfig, TraefikEntrypoints, VolumeConfig, DEFAULT_AUTOCONFIG_IMAGE,
    DEFAULT_DMARC, DEFAULT_MAILSERVER_IMAGE,
};
pub use status::MailServerStatus;
pub use traefik::{
    IngressRoute, IngressRouteSpec, Middleware, MiddlewareRef, MiddlewareSpec, RedirectScheme,
    Route, RouteService, RouteTls,
};

/// Field normalization applied to a desired object before it is compared
/// against the live one. Only kinds whose API server fills defaults that the
/// generator leaves out implement it.
pub trait Defaulting {
    fn apply_defaults(&mut self);
}
