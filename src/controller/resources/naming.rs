//! Object names and common labels.

use crate::constants::FIELD_MANAGER;
use std::collections::BTreeMap;

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Join the parts with `.` and turn every `.` into `-`, so a domain becomes a
/// valid object name: `normalize(&["mail", "example.com"])` is `mail-example-com`.
#[must_use]
pub fn normalize(parts: &[&str]) -> String {
    parts.join(".").replace('.', "-")
}

/// Labels shared by every object generated for a domain
#[must_use]
pub fn labels(domain: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), domain.to_string()),
        (LABEL_INSTANCE.to_string(), domain.to_string()),
        (LABEL_COMPONENT.to_string(), component.to_string()),
        (LABEL_PART_OF.to_string(), domain.to_string()),
        (LABEL_MANAGED_BY.to_string(), FIELD_MANAGER.to_string()),
    ])
}

/// Names of the objects generated for one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Names {
    domain: String,
}

impl Names {
    #[must_use]
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
        }
    }

    /// Deployment, service and A record
    #[must_use]
    pub fn mail(&self) -> String {
        normalize(&["mail", &self.domain])
    }

    #[must_use]
    pub fn data(&self) -> String {
        normalize(&[&self.domain, "data"])
    }

    #[must_use]
    pub fn cert(&self) -> String {
        normalize(&[&self.domain])
    }

    #[must_use]
    pub fn cert_secret(&self) -> String {
        normalize(&[&self.domain, "tls"])
    }

    #[must_use]
    pub fn credentials(&self) -> String {
        normalize(&["postmaster", &self.domain])
    }

    #[must_use]
    pub fn config(&self) -> String {
        normalize(&["config", &self.domain])
    }

    #[must_use]
    pub fn config_override(&self) -> String {
        normalize(&["config-override", &self.domain])
    }

    /// DNS record object name, e.g. `mx-example-com`
    #[must_use]
    pub fn record(&self, prefix: &str) -> String {
        normalize(&[prefix, &self.domain])
    }

    /// Autoconfig certificate, workload, service, SRV, ingress and plain route
    #[must_use]
    pub fn autoconfig(&self) -> String {
        normalize(&["autoconfig", &self.domain])
    }

    /// Autoconfig certificate secret and TLS route
    #[must_use]
    pub fn autoconfig_tls(&self) -> String {
        normalize(&["autoconfig", &self.domain, "tls"])
    }

    #[must_use]
    pub fn redirect(&self) -> String {
        normalize(&["redirect-to-https", &self.domain])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(&["mail", "example.com"]), "mail-example-com");
        assert_eq!(normalize(&["example.com", "tls"]), "example-com-tls");
        assert_eq!(normalize(&["sub.example.co.uk"]), "sub-example-co-uk");
    }

    #[test]
    fn test_names() {
        let names = Names::new("example.com");
        assert_eq!(names.mail(), "mail-example-com");
        assert_eq!(names.data(), "example-com-data");
        assert_eq!(names.cert_secret(), "example-com-tls");
        assert_eq!(names.credentials(), "postmaster-example-com");
        assert_eq!(names.config_override(), "config-override-example-com");
        assert_eq!(names.record("dkim"), "dkim-example-com");
        assert_eq!(names.autoconfig_tls(), "autoconfig-example-com-tls");
        assert_eq!(names.redirect(), "redirect-to-https-example-com");
    }

    #[test]
    fn test_labels() {
        let l = labels("example.com", "server");
        assert_eq!(l[LABEL_COMPONENT], "server");
        assert_eq!(l[LABEL_INSTANCE], "example.com");
        assert_eq!(l[LABEL_MANAGED_BY], "kube-mailserver");
        assert_eq!(l.len(), 5);
    }
}
