//! DNS records published for the domain.

use super::naming::{labels, Names};
use super::object_meta;
use crate::crd::{
    fqdn, ARecord, DnsRecord, DnsRecordSpec, MailServer, MxRecord, SrvRecord, TxtRecord,
    DEFAULT_DMARC,
};
use regex::{NoExpand, Regex};
use std::sync::LazyLock;

/// `{{ .Domain }}`, inner spacing optional
static DOMAIN_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\.Domain\s*\}\}").expect("placeholder pattern is valid"));

/// Mail client discovery records: prefix, service label and port
pub const SRV_SERVICES: [(&str, u16); 5] = [
    ("imap", 143),
    ("imaps", 993),
    ("pop3", 110),
    ("pop3s", 995),
    ("submission", 587),
];

fn record(ms: &MailServer, prefix: &str, spec: DnsRecordSpec) -> DnsRecord {
    let domain = &ms.spec.domain;
    let name = Names::new(domain).record(prefix);
    let mut rec = DnsRecord::new(&name, spec);
    rec.metadata = object_meta(ms, name, labels(domain, &format!("{prefix}-record")));
    rec
}

/// SPF value for a discovered public address
#[must_use]
pub fn spf_value(ip: &str) -> String {
    format!("v=spf1 a mx ip4:{} -all", ip.trim())
}

/// DMARC value with the `{{ .Domain }}` placeholder expanded
#[must_use]
pub fn dmarc_value(ms: &MailServer) -> String {
    let template = ms
        .spec
        .dmarc
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DMARC);
    DOMAIN_PLACEHOLDER
        .replace_all(template, NoExpand(&ms.spec.domain))
        .into_owned()
}

/// `mail.<domain>` A record pointing at the external address
#[must_use]
pub fn a_record(ms: &MailServer, ip: &str) -> DnsRecord {
    record(
        ms,
        "mail",
        DnsRecordSpec {
            a: Some(ARecord {
                name: fqdn(&format!("mail.{}", ms.spec.domain)),
                ttl: ms.spec.dns_ttl,
                target: ip.to_string(),
            }),
            ..Default::default()
        },
    )
}

#[must_use]
pub fn mx_record(ms: &MailServer) -> DnsRecord {
    let domain = &ms.spec.domain;
    record(
        ms,
        "mx",
        DnsRecordSpec {
            mx: Some(MxRecord {
                name: fqdn(domain),
                ttl: ms.spec.dns_ttl,
                preference: 10,
                target: fqdn(&format!("mail.{domain}")),
            }),
            ..Default::default()
        },
    )
}

/// SPF record. Without an explicit value the targets are left to the
/// discovery phase.
#[must_use]
pub fn spf_record(ms: &MailServer) -> DnsRecord {
    record(
        ms,
        "spf",
        DnsRecordSpec {
            txt: Some(TxtRecord {
                name: fqdn(&ms.spec.domain),
                ttl: ms.spec.dns_ttl,
                targets: ms.spec.explicit_spf().map(|spf| vec![spf.to_string()]),
            }),
            ..Default::default()
        },
    )
}

#[must_use]
pub fn dmarc_record(ms: &MailServer) -> DnsRecord {
    record(
        ms,
        "dmarc",
        DnsRecordSpec {
            txt: Some(TxtRecord {
                name: fqdn(&format!("_dmarc.{}", ms.spec.domain)),
                ttl: ms.spec.dns_ttl,
                targets: Some(vec![dmarc_value(ms)]),
            }),
            ..Default::default()
        },
    )
}

/// DKIM public key record, built from the key read out of the workload
#[must_use]
pub fn dkim_record(ms: &MailServer, targets: Vec<String>) -> DnsRecord {
    record(
        ms,
        "dkim",
        DnsRecordSpec {
            txt: Some(TxtRecord {
                name: fqdn(&format!("mail._domainkey.{}", ms.spec.domain)),
                ttl: ms.spec.dns_ttl,
                targets: Some(targets),
            }),
            ..Default::default()
        },
    )
}

/// `_<service>._tcp.<domain>` pointing at `mail.<domain>`
#[must_use]
pub fn srv_record(ms: &MailServer, service: &str, port: u16) -> DnsRecord {
    let domain = &ms.spec.domain;
    record(
        ms,
        service,
        DnsRecordSpec {
            srv: Some(SrvRecord {
                name: fqdn(&format!("_{service}._tcp.{domain}")),
                ttl: ms.spec.dns_ttl,
                priority: 10,
                weight: 10,
                port,
                target: fqdn(&format!("mail.{domain}")),
            }),
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::resources::tests::mail_server;

    #[test]
    fn test_dmarc_placeholder() {
        let ms = mail_server(serde_json::json!({}));
        assert!(dmarc_value(&ms).contains("rua=mailto:dmarc@example.com"));
        assert!(!dmarc_value(&ms).contains("{{"));

        let ms = mail_server(serde_json::json!({"dmarc": "v=DMARC1; p=none; rua=mailto:r@{{ .Domain }}"}));
        assert_eq!(dmarc_value(&ms), "v=DMARC1; p=none; rua=mailto:r@example.com");

        let ms = mail_server(serde_json::json!({"dmarc": "v=DMARC1; rua=mailto:a@{{.Domain}}"}));
        assert_eq!(dmarc_value(&ms), "v=DMARC1; rua=mailto:a@example.com");
    }

    #[test]
    fn test_spf_record_targets() {
        let ms = mail_server(serde_json::json!({}));
        assert_eq!(spf_record(&ms).spec.txt.unwrap().targets, None);

        let ms = mail_server(serde_json::json!({"spf": "v=spf1 mx -all"}));
        assert_eq!(
            spf_record(&ms).spec.txt.unwrap().targets,
            Some(vec!["v=spf1 mx -all".to_string()])
        );
        assert_eq!(spf_value(" 203.0.113.7\n"), "v=spf1 a mx ip4:203.0.113.7 -all");
    }

    #[test]
    fn test_srv_and_a_records() {
        let ms = mail_server(serde_json::json!({"dnsTTL": 600}));
        let srv = srv_record(&ms, "imaps", 993);
        assert_eq!(srv.metadata.name.as_deref(), Some("imaps-example-com"));
        let body = srv.spec.srv.unwrap();
        assert_eq!(body.name, "_imaps._tcp.example.com.");
        assert_eq!(body.target, "mail.example.com.");
        assert_eq!(body.ttl, Some(600));

        let a = a_record(&ms, "203.0.113.7");
        assert_eq!(a.metadata.name.as_deref(), Some("mail-example-com"));
        assert_eq!(a.spec.a.unwrap().name, "mail.example.com.");
    }
}
