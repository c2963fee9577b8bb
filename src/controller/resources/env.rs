//! # Mail server environment
//!
//! docker-mailserver is configured through environment variables. The values
//! are collected in [`MailConfig`] and flattened through [`ENV_FIELDS`], one
//! entry per variable, into the data of the `config-<domain>` secret.
//!
//! Encoding rules:
//! - text is copied as is
//! - booleans render as `1` or an empty string
//! - the TLS and bind switches render as `yes` / `no`
//! - optional booleans render as `1` only when set to true
//! - integers render in decimal, `0` renders empty

use crate::crd::MailServerSpec;
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroizing;

/// LDAP bind credentials read from the referenced secret
pub struct LdapCredentials {
    pub bind_dn: Zeroizing<String>,
    pub bind_pw: Zeroizing<String>,
}

impl LdapCredentials {
    #[must_use]
    pub fn new(bind_dn: String, bind_pw: String) -> Self {
        Self {
            bind_dn: Zeroizing::new(bind_dn),
            bind_pw: Zeroizing::new(bind_pw),
        }
    }
}

impl fmt::Debug for LdapCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapCredentials")
            .field("bind_dn", &self.bind_dn.as_str())
            .field("bind_pw", &"<redacted>")
            .finish()
    }
}

/// A value as it appears before encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvValue<'a> {
    Text(&'a str),
    Flag(bool),
    YesNo(bool),
    OptionalFlag(Option<bool>),
    Number(i32),
}

impl EnvValue<'_> {
    #[must_use]
    pub fn render(self) -> String {
        match self {
            EnvValue::Text(s) => s.to_string(),
            EnvValue::Flag(true) | EnvValue::OptionalFlag(Some(true)) => "1".to_string(),
            EnvValue::Flag(false) | EnvValue::OptionalFlag(_) => String::new(),
            EnvValue::YesNo(true) => "yes".to_string(),
            EnvValue::YesNo(false) => "no".to_string(),
            EnvValue::Number(0) => String::new(),
            EnvValue::Number(n) => n.to_string(),
        }
    }
}

/// One environment variable and where its value comes from
pub struct EnvField {
    pub key: &'static str,
    pub read: fn(&MailConfig) -> EnvValue<'_>,
}

impl fmt::Debug for EnvField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvField").field("key", &self.key).finish()
    }
}

/// Settings rendered into the mail server environment
#[derive(Debug, Clone, Default)]
pub struct MailConfig {
    pub override_hostname: String,
    pub log_level: String,
    pub supervisor_log_level: String,
    pub one_dir: Option<bool>,
    pub account_provisioner: String,
    pub postmaster_address: String,
    pub enable_update_check: bool,
    pub update_check_interval: String,
    pub permit_docker: String,
    pub tz: String,
    pub network_interface: String,
    pub tls_level: String,
    pub ssl_type: String,
    pub ssl_cert_path: String,
    pub ssl_key_path: String,
    pub ssl_alt_cert_path: String,
    pub ssl_alt_key_path: String,
    pub smtp_only: bool,
    pub spoof_protection: bool,
    pub enable_pop3: bool,
    pub enable_clamav: bool,
    pub enable_amavis: bool,
    pub amavis_log_level: String,
    pub enable_dnsbl: bool,
    pub enable_fail2ban: bool,
    pub fail2ban_block_type: String,
    pub enable_manage_sieve: bool,
    pub postscreen_action: String,
    pub clamav_message_size_limit: String,
    pub virus_mails_delete_delay: String,
    pub enable_postfix_virtual_transport: bool,
    pub postfix_dagent: String,
    pub postfix_mailbox_size_limit: String,
    pub enable_quotas: bool,
    pub postfix_message_size_limit: String,
    pub pflogsumm_trigger: String,
    pub pflogsumm_recipient: String,
    pub pflogsumm_sender: String,
    pub logwatch_interval: String,
    pub logwatch_recipient: String,
    pub logwatch_sender: String,
    pub report_recipient: String,
    pub report_sender: String,
    pub logrotate_interval: String,
    pub postfix_inet_protocols: String,
    pub dovecot_inet_protocols: String,
    pub enable_spamassassin: bool,
    pub spamassassin_spam_to_inbox: bool,
    pub enable_spamassassin_kam: bool,
    pub move_spam_to_junk: bool,
    pub sa_tag: String,
    pub sa_tag2: String,
    pub sa_kill: String,
    pub sa_spam_subject: String,
    pub enable_fetchmail: bool,
    pub fetchmail_poll: String,
    pub enable_postgrey: bool,
    pub postgrey_delay: String,
    pub postgrey_max_age: String,
    pub postgrey_text: String,
    pub postgrey_auto_whitelist_clients: String,
    pub enable_srs: bool,
    pub srs_sender_classes: String,
    pub srs_exclude_domains: String,
    pub srs_secret: String,
    pub default_relay_host: String,
    pub relay_host: String,
    pub relay_port: i32,
    pub relay_user: String,
    pub relay_password: String,
    pub enable_ldap: bool,
    pub ldap_start_tls: bool,
    pub ldap_server_host: String,
    pub ldap_search_base: String,
    pub ldap_bind_dn: Zeroizing<String>,
    pub ldap_bind_pw: Zeroizing<String>,
    pub ldap_query_filter_user: String,
    pub ldap_query_filter_group: String,
    pub ldap_query_filter_alias: String,
    pub ldap_query_filter_domain: String,
    pub dovecot_tls: bool,
    pub dovecot_hosts: String,
    pub dovecot_ldap_version: String,
    pub dovecot_user_filter: String,
    pub dovecot_pass_filter: String,
    pub dovecot_mailbox_format: String,
    pub dovecot_auth_bind: bool,
    pub dovecot_scope: String,
    pub dovecot_user_attrs: String,
    pub enable_saslauthd: bool,
    pub saslauthd_mechanisms: String,
    pub saslauthd_mech_options: String,
    pub saslauthd_ldap_server: String,
    pub saslauthd_ldap_bind_dn: Zeroizing<String>,
    pub saslauthd_ldap_password: Zeroizing<String>,
    pub saslauthd_ldap_search_base: String,
    pub saslauthd_ldap_filter: String,
    pub saslauthd_ldap_start_tls: bool,
    pub saslauthd_ldap_tls_check_peer: bool,
    pub saslauthd_ldap_tls_cacert_file: String,
    pub saslauthd_ldap_tls_cacert_dir: String,
    pub saslauthd_ldap_password_attr: String,
    pub sasl_passwd: String,
    pub saslauthd_ldap_auth_method: String,
    pub saslauthd_ldap_mech: String,
}

impl MailConfig {
    /// Settings for a `MailServer`, with the LDAP bind credentials when enabled
    #[must_use]
    pub fn for_server(spec: &MailServerSpec, ldap: Option<&LdapCredentials>) -> Self {
        let domain = spec.domain.as_str();
        let features = &spec.features;
        let ldap_spec = &features.ldap;
        let ldap_url = match ldap_spec.port {
            Some(port) => format!("ldaps://{}:{port}", ldap_spec.host),
            None => format!("ldaps://{}", ldap_spec.host),
        };
        let bind_dn = ldap.map(|c| c.bind_dn.as_str()).unwrap_or_default();
        let bind_pw = ldap.map(|c| c.bind_pw.as_str()).unwrap_or_default();
        let user_filter = if ldap_spec.user_filter.is_empty() {
            "(mail=%s)".to_string()
        } else {
            ldap_spec.user_filter.clone()
        };

        Self {
            override_hostname: format!("mail.{domain}"),
            one_dir: Some(true),
            account_provisioner: "file".to_string(),
            postmaster_address: format!("postmaster@{domain}"),
            ssl_type: "manual".to_string(),
            spoof_protection: features.spoof_protection.unwrap_or_default(),
            enable_pop3: features.pop3.unwrap_or_default(),
            enable_clamav: features.clamav.unwrap_or_default(),
            enable_amavis: features.amavis.unwrap_or_default(),
            enable_fail2ban: features.fail2ban.unwrap_or_default(),
            enable_manage_sieve: features.manage_sieve.unwrap_or_default(),
            postscreen_action: "enforce".to_string(),
            enable_quotas: features.quotas.unwrap_or_default(),
            enable_spamassassin: features.spamassassin.unwrap_or_default(),
            spamassassin_spam_to_inbox: true,
            enable_spamassassin_kam: features.spamassassin_kam.unwrap_or_default(),
            move_spam_to_junk: true,
            sa_tag: "2.0".to_string(),
            sa_tag2: "6.31".to_string(),
            sa_kill: "6.31".to_string(),
            sa_spam_subject: "***SPAM*****".to_string(),
            enable_postgrey: features.postgrey.unwrap_or_default(),
            postgrey_delay: "300".to_string(),
            postgrey_max_age: "35".to_string(),
            postgrey_text: "Delayed by postgrey".to_string(),
            enable_ldap: ldap_spec.enabled,
            ldap_start_tls: ldap_spec.start_tls,
            ldap_server_host: ldap_url.clone(),
            ldap_search_base: ldap_spec.search_base.clone(),
            ldap_bind_dn: Zeroizing::new(bind_dn.to_string()),
            ldap_bind_pw: Zeroizing::new(bind_pw.to_string()),
            ldap_query_filter_user: user_filter,
            ldap_query_filter_group: "(&(objectclass=group)(mail=%s))".to_string(),
            ldap_query_filter_alias: "(&(objectClass=user)(otherMailbox=%s))".to_string(),
            ldap_query_filter_domain: "(mail=*@%s)".to_string(),
            dovecot_tls: true,
            dovecot_hosts: ldap_spec.host.clone(),
            dovecot_ldap_version: "3".to_string(),
            dovecot_user_filter: "(mail=%u)".to_string(),
            dovecot_pass_filter: "(mail=%u)".to_string(),
            dovecot_auth_bind: true,
            dovecot_scope: "subtree".to_string(),
            dovecot_user_attrs: "=uid=5000,=gid=5000,=user=%{ldap:mail},=mail=maildir:/var/mail/%d/%n/,=home=/var/mail/%d/%n/,".to_string(),
            saslauthd_mechanisms: "ldap".to_string(),
            saslauthd_ldap_server: ldap_url,
            saslauthd_ldap_bind_dn: Zeroizing::new(bind_dn.to_string()),
            saslauthd_ldap_password: Zeroizing::new(bind_pw.to_string()),
            saslauthd_ldap_search_base: ldap_spec.search_base.clone(),
            saslauthd_ldap_filter: "(mail=%s)".to_string(),
            saslauthd_ldap_start_tls: ldap_spec.start_tls,
            ..Self::default()
        }
    }

    /// Flatten into environment variables
    #[must_use]
    pub fn to_env(&self) -> BTreeMap<String, String> {
        ENV_FIELDS
            .iter()
            .map(|field| (field.key.to_string(), (field.read)(self).render()))
            .collect()
    }
}

pub static ENV_FIELDS: &[EnvField] = &[
    EnvField { key: "OVERRIDE_HOSTNAME", read: |c| EnvValue::Text(&c.override_hostname) },
    EnvField { key: "LOG_LEVEL", read: |c| EnvValue::Text(&c.log_level) },
    EnvField { key: "SUPERVISOR_LOGLEVEL", read: |c| EnvValue::Text(&c.supervisor_log_level) },
    EnvField { key: "ONE_DIR", read: |c| EnvValue::OptionalFlag(c.one_dir) },
    EnvField { key: "ACCOUNT_PROVISIONER", read: |c| EnvValue::Text(&c.account_provisioner) },
    EnvField { key: "POSTMASTER_ADDRESS", read: |c| EnvValue::Text(&c.postmaster_address) },
    EnvField { key: "ENABLE_UPDATE_CHECK", read: |c| EnvValue::Flag(c.enable_update_check) },
    EnvField { key: "UPDATE_CHECK_INTERVAL", read: |c| EnvValue::Text(&c.update_check_interval) },
    EnvField { key: "PERMIT_DOCKER", read: |c| EnvValue::Text(&c.permit_docker) },
    EnvField { key: "TZ", read: |c| EnvValue::Text(&c.tz) },
    EnvField { key: "NETWORK_INTERFACE", read: |c| EnvValue::Text(&c.network_interface) },
    EnvField { key: "TLS_LEVEL", read: |c| EnvValue::Text(&c.tls_level) },
    EnvField { key: "SSL_TYPE", read: |c| EnvValue::Text(&c.ssl_type) },
    EnvField { key: "SSL_CERT_PATH", read: |c| EnvValue::Text(&c.ssl_cert_path) },
    EnvField { key: "SSL_KEY_PATH", read: |c| EnvValue::Text(&c.ssl_key_path) },
    EnvField { key: "SSL_ALT_CERT_PATH", read: |c| EnvValue::Text(&c.ssl_alt_cert_path) },
    EnvField { key: "SSL_ALT_KEY_PATH", read: |c| EnvValue::Text(&c.ssl_alt_key_path) },
    EnvField { key: "SMTP_ONLY", read: |c| EnvValue::Flag(c.smtp_only) },
    EnvField { key: "SPOOF_PROTECTION", read: |c| EnvValue::Flag(c.spoof_protection) },
    EnvField { key: "ENABLE_POP3", read: |c| EnvValue::Flag(c.enable_pop3) },
    EnvField { key: "ENABLE_CLAMAV", read: |c| EnvValue::Flag(c.enable_clamav) },
    EnvField { key: "ENABLE_AMAVIS", read: |c| EnvValue::Flag(c.enable_amavis) },
    EnvField { key: "AMAVIS_LOGLEVEL", read: |c| EnvValue::Text(&c.amavis_log_level) },
    EnvField { key: "ENABLE_DNSBL", read: |c| EnvValue::Flag(c.enable_dnsbl) },
    EnvField { key: "ENABLE_FAIL2BAN", read: |c| EnvValue::Flag(c.enable_fail2ban) },
    EnvField { key: "FAIL2BAN_BLOCKTYPE", read: |c| EnvValue::Text(&c.fail2ban_block_type) },
    EnvField { key: "ENABLE_MANAGESIEVE", read: |c| EnvValue::Flag(c.enable_manage_sieve) },
    EnvField { key: "POSTSCREEN_ACTION", read: |c| EnvValue::Text(&c.postscreen_action) },
    EnvField { key: "CLAMAV_MESSAGE_SIZE_LIMIT", read: |c| EnvValue::Text(&c.clamav_message_size_limit) },
    EnvField { key: "VIRUSMAILS_DELETE_DELAY", read: |c| EnvValue::Text(&c.virus_mails_delete_delay) },
    EnvField { key: "ENABLE_POSTFIX_VIRTUAL_TRANSPORT", read: |c| EnvValue::Flag(c.enable_postfix_virtual_transport) },
    EnvField { key: "POSTFIX_DAGENT", read: |c| EnvValue::Text(&c.postfix_dagent) },
    EnvField { key: "POSTFIX_MAILBOX_SIZE_LIMIT", read: |c| EnvValue::Text(&c.postfix_mailbox_size_limit) },
    EnvField { key: "ENABLE_QUOTAS", read: |c| EnvValue::Flag(c.enable_quotas) },
    EnvField { key: "POSTFIX_MESSAGE_SIZE_LIMIT", read: |c| EnvValue::Text(&c.postfix_message_size_limit) },
    EnvField { key: "PFLOGSUMM_TRIGGER", read: |c| EnvValue::Text(&c.pflogsumm_trigger) },
    EnvField { key: "PFLOGSUMM_RECIPIENT", read: |c| EnvValue::Text(&c.pflogsumm_recipient) },
    EnvField { key: "PFLOGSUMM_SENDER", read: |c| EnvValue::Text(&c.pflogsumm_sender) },
    EnvField { key: "LOGWATCH_INTERVAL", read: |c| EnvValue::Text(&c.logwatch_interval) },
    EnvField { key: "LOGWATCH_RECIPIENT", read: |c| EnvValue::Text(&c.logwatch_recipient) },
    EnvField { key: "LOGWATCH_SENDER", read: |c| EnvValue::Text(&c.logwatch_sender) },
    EnvField { key: "REPORT_RECIPIENT", read: |c| EnvValue::Text(&c.report_recipient) },
    EnvField { key: "REPORT_SENDER", read: |c| EnvValue::Text(&c.report_sender) },
    EnvField { key: "LOGROTATE_INTERVAL", read: |c| EnvValue::Text(&c.logrotate_interval) },
    EnvField { key: "POSTFIX_INET_PROTOCOLS", read: |c| EnvValue::Text(&c.postfix_inet_protocols) },
    EnvField { key: "DOVECOT_INET_PROTOCOLS", read: |c| EnvValue::Text(&c.dovecot_inet_protocols) },
    EnvField { key: "ENABLE_SPAMASSASSIN", read: |c| EnvValue::Flag(c.enable_spamassassin) },
    EnvField { key: "SPAMASSASSIN_SPAM_TO_INBOX", read: |c| EnvValue::Flag(c.spamassassin_spam_to_inbox) },
    EnvField { key: "ENABLE_SPAMASSASSIN_KAM", read: |c| EnvValue::Flag(c.enable_spamassassin_kam) },
    EnvField { key: "MOVE_SPAM_TO_JUNK", read: |c| EnvValue::Flag(c.move_spam_to_junk) },
    EnvField { key: "SA_TAG", read: |c| EnvValue::Text(&c.sa_tag) },
    EnvField { key: "SA_TAG2", read: |c| EnvValue::Text(&c.sa_tag2) },
    EnvField { key: "SA_KILL", read: |c| EnvValue::Text(&c.sa_kill) },
    EnvField { key: "SA_SPAM_SUBJECT", read: |c| EnvValue::Text(&c.sa_spam_subject) },
    EnvField { key: "ENABLE_FETCHMAIL", read: |c| EnvValue::Flag(c.enable_fetchmail) },
    EnvField { key: "FETCHMAIL_POLL", read: |c| EnvValue::Text(&c.fetchmail_poll) },
    EnvField { key: "ENABLE_POSTGREY", read: |c| EnvValue::Flag(c.enable_postgrey) },
    EnvField { key: "POSTGREY_DELAY", read: |c| EnvValue::Text(&c.postgrey_delay) },
    EnvField { key: "POSTGREY_MAX_AGE", read: |c| EnvValue::Text(&c.postgrey_max_age) },
    EnvField { key: "POSTGREY_TEXT", read: |c| EnvValue::Text(&c.postgrey_text) },
    EnvField { key: "POSTGREY_AUTO_WHITELIST_CLIENTS", read: |c| EnvValue::Text(&c.postgrey_auto_whitelist_clients) },
    EnvField { key: "ENABLE_SRS", read: |c| EnvValue::Flag(c.enable_srs) },
    EnvField { key: "SRS_SENDER_CLASSES", read: |c| EnvValue::Text(&c.srs_sender_classes) },
    EnvField { key: "SRS_EXCLUDE_DOMAINS", read: |c| EnvValue::Text(&c.srs_exclude_domains) },
    EnvField { key: "SRS_SECRET", read: |c| EnvValue::Text(&c.srs_secret) },
    EnvField { key: "DEFAULT_RELAY_HOST", read: |c| EnvValue::Text(&c.default_relay_host) },
    EnvField { key: "RELAY_HOST", read: |c| EnvValue::Text(&c.relay_host) },
    EnvField { key: "RELAY_PORT", read: |c| EnvValue::Number(c.relay_port) },
    EnvField { key: "RELAY_USER", read: |c| EnvValue::Text(&c.relay_user) },
    EnvField { key: "RELAY_PASSWORD", read: |c| EnvValue::Text(&c.relay_password) },
    EnvField { key: "ENABLE_LDAP", read: |c| EnvValue::Flag(c.enable_ldap) },
    EnvField { key: "LDAP_START_TLS", read: |c| EnvValue::YesNo(c.ldap_start_tls) },
    EnvField { key: "LDAP_SERVER_HOST", read: |c| EnvValue::Text(&c.ldap_server_host) },
    EnvField { key: "LDAP_SEARCH_BASE", read: |c| EnvValue::Text(&c.ldap_search_base) },
    EnvField { key: "LDAP_BIND_DN", read: |c| EnvValue::Text(c.ldap_bind_dn.as_str()) },
    EnvField { key: "LDAP_BIND_PW", read: |c| EnvValue::Text(c.ldap_bind_pw.as_str()) },
    EnvField { key: "LDAP_QUERY_FILTER_USER", read: |c| EnvValue::Text(&c.ldap_query_filter_user) },
    EnvField { key: "LDAP_QUERY_FILTER_GROUP", read: |c| EnvValue::Text(&c.ldap_query_filter_group) },
    EnvField { key: "LDAP_QUERY_FILTER_ALIAS", read: |c| EnvValue::Text(&c.ldap_query_filter_alias) },
    EnvField { key: "LDAP_QUERY_FILTER_DOMAIN", read: |c| EnvValue::Text(&c.ldap_query_filter_domain) },
    EnvField { key: "DOVECOT_TLS", read: |c| EnvValue::YesNo(c.dovecot_tls) },
    EnvField { key: "DOVECOT_HOSTS", read: |c| EnvValue::Text(&c.dovecot_hosts) },
    EnvField { key: "DOVECOT_LDAP_VERSION", read: |c| EnvValue::Text(&c.dovecot_ldap_version) },
    EnvField { key: "DOVECOT_USER_FILTER", read: |c| EnvValue::Text(&c.dovecot_user_filter) },
    EnvField { key: "DOVECOT_PASS_FILTER", read: |c| EnvValue::Text(&c.dovecot_pass_filter) },
    EnvField { key: "DOVECOT_MAILBOX_FORMAT", read: |c| EnvValue::Text(&c.dovecot_mailbox_format) },
    EnvField { key: "DOVECOT_AUTH_BIND", read: |c| EnvValue::YesNo(c.dovecot_auth_bind) },
    EnvField { key: "DOVECOT_SCOPE", read: |c| EnvValue::Text(&c.dovecot_scope) },
    EnvField { key: "DOVECOT_USER_ATTRS", read: |c| EnvValue::Text(&c.dovecot_user_attrs) },
    EnvField { key: "ENABLE_SASLAUTHD", read: |c| EnvValue::Flag(c.enable_saslauthd) },
    EnvField { key: "SASLAUTHD_MECHANISMS", read: |c| EnvValue::Text(&c.saslauthd_mechanisms) },
    EnvField { key: "SASLAUTHD_MECH_OPTIONS", read: |c| EnvValue::Text(&c.saslauthd_mech_options) },
    EnvField { key: "SASLAUTHD_LDAP_SERVER", read: |c| EnvValue::Text(&c.saslauthd_ldap_server) },
    EnvField { key: "SASLAUTHD_LDAP_BIND_DN", read: |c| EnvValue::Text(c.saslauthd_ldap_bind_dn.as_str()) },
    EnvField { key: "SASLAUTHD_LDAP_PASSWORD", read: |c| EnvValue::Text(c.saslauthd_ldap_password.as_str()) },
    EnvField { key: "SASLAUTHD_LDAP_SEARCH_BASE", read: |c| EnvValue::Text(&c.saslauthd_ldap_search_base) },
    EnvField { key: "SASLAUTHD_LDAP_FILTER", read: |c| EnvValue::Text(&c.saslauthd_ldap_filter) },
    EnvField { key: "SASLAUTHD_LDAP_START_TLS", read: |c| EnvValue::YesNo(c.saslauthd_ldap_start_tls) },
    EnvField { key: "SASLAUTHD_LDAP_TLS_CHECK_PEER", read: |c| EnvValue::YesNo(c.saslauthd_ldap_tls_check_peer) },
    EnvField { key: "SASLAUTHD_LDAP_TLS_CACERT_FILE", read: |c| EnvValue::Text(&c.saslauthd_ldap_tls_cacert_file) },
    EnvField { key: "SASLAUTHD_LDAP_TLS_CACERT_DIR", read: |c| EnvValue::Text(&c.saslauthd_ldap_tls_cacert_dir) },
    EnvField { key: "SASLAUTHD_LDAP_PASSWORD_ATTR", read: |c| EnvValue::Text(&c.saslauthd_ldap_password_attr) },
    EnvField { key: "SASL_PASSWD", read: |c| EnvValue::Text(&c.sasl_passwd) },
    EnvField { key: "SASLAUTHD_LDAP_AUTH_METHOD", read: |c| EnvValue::Text(&c.saslauthd_ldap_auth_method) },
    EnvField { key: "SASLAUTHD_LDAP_MECH", read: |c| EnvValue::Text(&c.saslauthd_ldap_mech) },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::MailServerSpec;
    use std::collections::HashSet;

    fn spec() -> MailServerSpec {
        serde_json::from_value(serde_json::json!({
            "domain": "example.com",
            "issuerRef": {"name": "letsencrypt"}
        }))
        .unwrap()
    }

    #[test]
    fn test_value_encoding() {
        assert_eq!(EnvValue::Flag(true).render(), "1");
        assert_eq!(EnvValue::Flag(false).render(), "");
        assert_eq!(EnvValue::YesNo(true).render(), "yes");
        assert_eq!(EnvValue::YesNo(false).render(), "no");
        assert_eq!(EnvValue::OptionalFlag(None).render(), "");
        assert_eq!(EnvValue::OptionalFlag(Some(false)).render(), "");
        assert_eq!(EnvValue::OptionalFlag(Some(true)).render(), "1");
        assert_eq!(EnvValue::Number(0).render(), "");
        assert_eq!(EnvValue::Number(587).render(), "587");
    }

    #[test]
    fn test_keys_are_unique() {
        let keys: HashSet<&str> = ENV_FIELDS.iter().map(|f| f.key).collect();
        assert_eq!(keys.len(), ENV_FIELDS.len());
    }

    #[test]
    fn test_defaults_for_domain() {
        let env = MailConfig::for_server(&spec(), None).to_env();
        assert_eq!(env.len(), ENV_FIELDS.len());
        assert_eq!(env["OVERRIDE_HOSTNAME"], "mail.example.com");
        assert_eq!(env["POSTMASTER_ADDRESS"], "postmaster@example.com");
        assert_eq!(env["ONE_DIR"], "1");
        assert_eq!(env["ACCOUNT_PROVISIONER"], "file");
        assert_eq!(env["SSL_TYPE"], "manual");
        assert_eq!(env["ENABLE_POP3"], "");
        assert_eq!(env["MOVE_SPAM_TO_JUNK"], "1");
        assert_eq!(env["RELAY_PORT"], "");
        assert_eq!(env["DOVECOT_TLS"], "yes");
        assert_eq!(env["DOVECOT_AUTH_BIND"], "yes");
        assert_eq!(env["SASLAUTHD_LDAP_TLS_CHECK_PEER"], "no");
        assert_eq!(env["LDAP_START_TLS"], "no");
        assert_eq!(env["ENABLE_LDAP"], "");
        assert_eq!(env["SA_SPAM_SUBJECT"], "***SPAM*****");
    }

    #[test]
    fn test_features_and_ldap() {
        let mut spec = spec();
        spec.features.pop3 = Some(true);
        spec.features.spamassassin = Some(true);
        spec.features.ldap.enabled = true;
        spec.features.ldap.start_tls = true;
        spec.features.ldap.host = "ldap.example.com".to_string();
        spec.features.ldap.search_base = "dc=example,dc=com".to_string();
        let creds = LdapCredentials::new("cn=admin".to_string(), "secret".to_string());

        let env = MailConfig::for_server(&spec, Some(&creds)).to_env();
        assert_eq!(env["ENABLE_POP3"], "1");
        assert_eq!(env["ENABLE_SPAMASSASSIN"], "1");
        assert_eq!(env["ENABLE_LDAP"], "1");
        assert_eq!(env["LDAP_START_TLS"], "yes");
        assert_eq!(env["SASLAUTHD_LDAP_START_TLS"], "yes");
        assert_eq!(env["LDAP_SERVER_HOST"], "ldaps://ldap.example.com");
        assert_eq!(env["DOVECOT_HOSTS"], "ldap.example.com");
        assert_eq!(env["LDAP_BIND_DN"], "cn=admin");
        assert_eq!(env["SASLAUTHD_LDAP_PASSWORD"], "secret");
        assert_eq!(env["LDAP_SEARCH_BASE"], "dc=example,dc=com");
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = LdapCredentials::new("cn=admin".to_string(), "secret".to_string());
        let debug = format!("{creds:?}");
        assert!(debug.contains("cn=admin"));
        assert!(!debug.contains("secret"));
    }
}
