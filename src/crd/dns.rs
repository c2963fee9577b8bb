//! # DNS records
//!
//! `DNSRecord` objects consumed by the in-cluster DNS operator. Exactly one of
//! the record variants is set per object.

use crate::constants::DEFAULT_DNS_TTL;
use crate::crd::Defaulting;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    kind = "DNSRecord",
    root = "DnsRecord",
    group = "dns.linka.cloud",
    version = "v1alpha1",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecordSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<ARecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mx: Option<MxRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txt: Option<TxtRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srv: Option<SrvRecord>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ARecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    pub target: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MxRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    pub preference: u16,
    pub target: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TxtRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    /// Left unset when another phase owns the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SrvRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

/// Append the root label when missing.
#[must_use]
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

fn default_record(name: &mut String, ttl: &mut Option<u32>) {
    *name = fqdn(name);
    if ttl.is_none_or(|t| t == 0) {
        *ttl = Some(DEFAULT_DNS_TTL);
    }
}

impl Defaulting for DnsRecord {
    fn apply_defaults(&mut self) {
        let spec = &mut self.spec;
        if let Some(a) = spec.a.as_mut() {
            default_record(&mut a.name, &mut a.ttl);
            a.target = a.target.trim().to_string();
        }
        if let Some(mx) = spec.mx.as_mut() {
            default_record(&mut mx.name, &mut mx.ttl);
            mx.target = fqdn(&mx.target);
        }
        if let Some(txt) = spec.txt.as_mut() {
            default_record(&mut txt.name, &mut txt.ttl);
        }
        if let Some(srv) = spec.srv.as_mut() {
            default_record(&mut srv.name, &mut srv.ttl);
            srv.target = fqdn(&srv.target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_record_type_serves_dns_operator_kind() {
        assert_eq!(DnsRecord::kind(&()), "DNSRecord");
        assert_eq!(DnsRecord::api_version(&()), "dns.linka.cloud/v1alpha1");
        assert_eq!(DnsRecord::plural(&()), "dnsrecords");

        let rec = DnsRecord::new("spf-example-com", DnsRecordSpec::default());
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["kind"], "DNSRecord");
        assert_eq!(value["metadata"]["name"], "spf-example-com");
    }

    #[test]
    fn test_defaults_qualify_names_and_fill_ttl() {
        let mut rec = DnsRecord::new(
            "mx-example-com",
            DnsRecordSpec {
                mx: Some(MxRecord {
                    name: "example.com".to_string(),
                    ttl: Some(0),
                    preference: 10,
                    target: "mail.example.com".to_string(),
                }),
                ..Default::default()
            },
        );
        rec.apply_defaults();
        let mx = rec.spec.mx.unwrap();
        assert_eq!(mx.name, "example.com.");
        assert_eq!(mx.target, "mail.example.com.");
        assert_eq!(mx.ttl, Some(DEFAULT_DNS_TTL));
    }

    #[test]
    fn test_defaults_keep_explicit_ttl() {
        let mut rec = DnsRecord::new(
            "dkim-example-com",
            DnsRecordSpec {
                txt: Some(TxtRecord {
                    name: "mail._domainkey.example.com.".to_string(),
                    ttl: Some(300),
                    targets: None,
                }),
                ..Default::default()
            },
        );
        rec.apply_defaults();
        let txt = rec.spec.txt.unwrap();
        assert_eq!(txt.name, "mail._domainkey.example.com.");
        assert_eq!(txt.ttl, Some(300));
    }
}
