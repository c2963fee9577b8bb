//! Mail workload objects: secrets, config override, deployment, service,
//! data claim and certificate.

use super::env::{LdapCredentials, MailConfig};
use super::naming::{labels, Names};
use super::object_meta;
use crate::constants::MAILSERVER_CONTAINER;
use crate::crd::{Certificate, CertificateSpec, MailServer};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvFromSource,
    EnvVar, EnvVarSource, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodDNSConfig, PodSpec, PodTemplateSpec, Secret,
    SecretEnvSource, SecretKeySelector, SecretVolumeSource, SecurityContext, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

pub const CONFIG_OVERRIDE_VOLUME: &str = "config-override";
pub const LDAP_GROUPS_FILE: &str = "ldap-groups.cf";

const LDAP_GROUPS: &str = "bind                     = yes
bind_dn                  = cn=admin,dc=domain,dc=com
bind_pw                  = admin
query_filter             = (&(mailGroupMember=%s)(mailEnabled=TRUE))
search_base              = ou=people,dc=domain,dc=com
server_host              = mail.domain.com
start_tls                = no
version                  = 3

leaf_result_attribute = mail
special_result_attribute = member
";

const SETUP_SCRIPT: &str = r#"( listmailuser|grep -s $POSTMASTER_EMAIL || (echo "Creating Postmaster email $POSTMASTER_EMAIL" && addmailuser $POSTMASTER_EMAIL $POSTMASTER_PASSWORD)) && ( test -f /tmp/docker-mailserver/opendkim/keys/${MAIL_DOMAIN}/mail.private || (echo "Generating DKIM Private Key" && open-dkim) )"#;

/// Mail ports, shared by the container and the service
const MAIL_PORTS: [(&str, i32); 8] = [
    ("smtp", 25),
    ("imap", 143),
    ("esmtp-implicit", 465),
    ("esmtp-explicit", 587),
    ("imap-implicit", 993),
    ("pop3", 110),
    ("pop3s", 995),
    ("sieve", 4190),
];

const CAPABILITIES: [&str; 12] = [
    "CHOWN",
    "FOWNER",
    "MKNOD",
    "SETGID",
    "SETUID",
    "DAC_OVERRIDE",
    "NET_ADMIN",
    "NET_RAW",
    "NET_BIND_SERVICE",
    "SYS_CHROOT",
    "SYS_PTRACE",
    "KILL",
];

/// Postmaster login, created once and never regenerated
#[must_use]
pub fn credentials_secret(ms: &MailServer, password: &str) -> Secret {
    let domain = &ms.spec.domain;
    let names = Names::new(domain);
    Secret {
        metadata: object_meta(ms, names.credentials(), labels(domain, "credentials")),
        data: Some(BTreeMap::from([
            (
                "email".to_string(),
                ByteString(format!("postmaster@{domain}").into_bytes()),
            ),
            (
                "password".to_string(),
                ByteString(password.as_bytes().to_vec()),
            ),
        ])),
        ..Default::default()
    }
}

/// Rendered environment of the mail server
#[must_use]
pub fn config_secret(ms: &MailServer, ldap: Option<&LdapCredentials>) -> Secret {
    let domain = &ms.spec.domain;
    let env = MailConfig::for_server(&ms.spec, ldap).to_env();
    Secret {
        metadata: object_meta(ms, Names::new(domain).config(), labels(domain, "config")),
        data: Some(
            env.into_iter()
                .map(|(k, v)| (k, ByteString(v.into_bytes())))
                .collect(),
        ),
        ..Default::default()
    }
}

#[must_use]
pub fn config_override(ms: &MailServer) -> ConfigMap {
    let domain = &ms.spec.domain;
    let mut data = BTreeMap::new();
    if ms.spec.ldap_enabled() {
        data.insert(LDAP_GROUPS_FILE.to_string(), LDAP_GROUPS.to_string());
    }
    ConfigMap {
        metadata: object_meta(
            ms,
            Names::new(domain).config_override(),
            labels(domain, CONFIG_OVERRIDE_VOLUME),
        ),
        data: Some(data),
        ..Default::default()
    }
}

fn security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        read_only_root_filesystem: Some(false),
        run_as_user: Some(0),
        run_as_group: Some(0),
        run_as_non_root: Some(false),
        privileged: Some(false),
        capabilities: Some(Capabilities {
            add: Some(CAPABILITIES.iter().map(|c| (*c).to_string()).collect()),
            drop: Some(vec!["ALL".to_string()]),
        }),
        ..Default::default()
    }
}

fn volume_mounts(ms: &MailServer) -> Vec<VolumeMount> {
    let data_mount = |path: &str, sub_path: &str| VolumeMount {
        name: "mail-data".to_string(),
        mount_path: path.to_string(),
        sub_path: Some(sub_path.to_string()),
        ..Default::default()
    };
    let mut mounts = vec![
        data_mount("/var/mail", "volumes/maildata"),
        data_mount("/var/mail-state", "volumes/mailstate"),
        data_mount("/tmp/docker-mailserver", "config"),
        VolumeMount {
            name: "certs".to_string(),
            mount_path: "/etc/mailserver/ssl/".to_string(),
            read_only: Some(true),
            ..Default::default()
        },
    ];
    if ms.spec.ldap_enabled() {
        mounts.push(VolumeMount {
            name: CONFIG_OVERRIDE_VOLUME.to_string(),
            mount_path: format!("/tmp/docker-mailserver/{LDAP_GROUPS_FILE}"),
            sub_path: Some(LDAP_GROUPS_FILE.to_string()),
            read_only: Some(true),
            ..Default::default()
        });
    }
    mounts.extend(ms.spec.deployment.volume_mounts.iter().cloned());
    mounts
}

fn volumes(ms: &MailServer) -> Vec<Volume> {
    let names = Names::new(&ms.spec.domain);
    let mut vols = vec![
        Volume {
            name: "certs".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(names.cert_secret()),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "mail-data".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: names.data(),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];
    if ms.spec.ldap_enabled() {
        vols.push(Volume {
            name: CONFIG_OVERRIDE_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: names.config_override(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    vols.extend(ms.spec.deployment.volumes.iter().cloned());
    vols
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn plain_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn non_empty<K: Ord + Clone, V: Clone>(map: &BTreeMap<K, V>) -> Option<BTreeMap<K, V>> {
    (!map.is_empty()).then(|| map.clone())
}

fn non_empty_vec<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    (!items.is_empty()).then(|| items.to_vec())
}

/// The docker-mailserver workload. The pod template annotation carrying the
/// config hash is added by [`super::set_config_hash`].
#[must_use]
pub fn deployment(ms: &MailServer) -> Deployment {
    let spec = &ms.spec;
    let domain = &spec.domain;
    let names = Names::new(domain);
    let server_labels = labels(domain, "server");
    let settings = &spec.deployment;
    let env_from = vec![EnvFromSource {
        secret_ref: Some(SecretEnvSource {
            name: names.config(),
            ..Default::default()
        }),
        ..Default::default()
    }];

    let mut init_env = vec![
        secret_env("POSTMASTER_EMAIL", &names.credentials(), "email"),
        secret_env("POSTMASTER_PASSWORD", &names.credentials(), "password"),
        plain_env("MAIL_DOMAIN", domain),
    ];
    init_env.extend(settings.env.iter().cloned());

    let setup = Container {
        name: "setup".to_string(),
        image: Some(spec.image().to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["/bin/bash".to_string()]),
        args: Some(vec!["-c".to_string(), SETUP_SCRIPT.to_string()]),
        env: Some(init_env),
        env_from: Some(env_from.clone()),
        resources: settings.resources.clone(),
        security_context: Some(security_context()),
        volume_mounts: Some(volume_mounts(ms)),
        ..Default::default()
    };

    let mailserver = Container {
        name: MAILSERVER_CONTAINER.to_string(),
        image: Some(spec.image().to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env_from: Some(env_from),
        env: Some(vec![
            plain_env("SSL_TYPE", "manual"),
            plain_env("SSL_CERT_PATH", "/etc/mailserver/ssl/tls.crt"),
            plain_env("SSL_KEY_PATH", "/etc/mailserver/ssl/tls.key"),
        ]),
        resources: settings.resources.clone(),
        security_context: Some(security_context()),
        volume_mounts: Some(volume_mounts(ms)),
        ports: Some(
            MAIL_PORTS
                .iter()
                .map(|(name, port)| ContainerPort {
                    name: Some((*name).to_string()),
                    container_port: *port,
                    ..Default::default()
                })
                .collect(),
        ),
        ..Default::default()
    };

    let mut pod = PodSpec {
        service_account_name: settings.service_account_name.clone(),
        affinity: settings.affinity.clone(),
        security_context: settings.security_context.clone(),
        topology_spread_constraints: non_empty_vec(&settings.topology_spread_constraints),
        tolerations: non_empty_vec(&settings.tolerations),
        node_selector: non_empty(&settings.node_selector),
        hostname: Some("mail".to_string()),
        restart_policy: Some("Always".to_string()),
        init_containers: Some(vec![setup]),
        containers: vec![mailserver],
        volumes: Some(volumes(ms)),
        ..Default::default()
    };
    if let Some(nameserver) = spec
        .features
        .ldap
        .nameserver
        .as_deref()
        .filter(|_| spec.ldap_enabled())
    {
        pod.dns_policy = Some("None".to_string());
        pod.dns_config = Some(PodDNSConfig {
            nameservers: Some(vec![nameserver.to_string()]),
            ..Default::default()
        });
    }

    let mut metadata = object_meta(ms, names.mail(), server_labels.clone());
    metadata.annotations = non_empty(&settings.annotations);

    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas()),
            selector: LabelSelector {
                match_labels: Some(server_labels.clone()),
                ..Default::default()
            },
            strategy: settings.strategy.clone(),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(server_labels),
                    annotations: non_empty(&settings.annotations),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Load balancer in front of the mail workload
#[must_use]
pub fn service(ms: &MailServer) -> Service {
    let spec = &ms.spec;
    let domain = &spec.domain;
    Service {
        metadata: object_meta(ms, Names::new(domain).mail(), labels(domain, "service")),
        spec: Some(ServiceSpec {
            selector: Some(labels(domain, "server")),
            type_: Some("LoadBalancer".to_string()),
            load_balancer_ip: spec.load_balancer_ip.clone().filter(|ip| !ip.is_empty()),
            load_balancer_class: spec.load_balancer_class.clone(),
            external_traffic_policy: Some("Local".to_string()),
            ports: Some(
                MAIL_PORTS
                    .iter()
                    .map(|(name, port)| ServicePort {
                        name: Some((*name).to_string()),
                        port: *port,
                        target_port: Some(IntOrString::Int(*port)),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Mail data. Not owned by the `MailServer` so it outlives it.
#[must_use]
pub fn data_claim(ms: &MailServer) -> PersistentVolumeClaim {
    let volume = &ms.spec.volume;
    let domain = &ms.spec.domain;
    PersistentVolumeClaim {
        metadata: object_meta(ms, Names::new(domain).data(), labels(domain, "storage")),
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: volume.storage_class.clone().filter(|s| !s.is_empty()),
            access_modes: Some(vec![volume.access_mode.clone()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(volume.size.clone()),
                )])),
                ..Default::default()
            }),
            volume_mode: Some("Filesystem".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// TLS certificate for the domain and its `mail.` host
#[must_use]
pub fn certificate(ms: &MailServer) -> Certificate {
    let domain = &ms.spec.domain;
    let names = Names::new(domain);
    let mut cert = Certificate::new(
        &names.cert(),
        CertificateSpec {
            common_name: Some(domain.clone()),
            dns_names: vec![domain.clone(), format!("mail.{domain}")],
            secret_name: names.cert_secret(),
            issuer_ref: ms.spec.issuer_ref.clone(),
        },
    );
    cert.metadata = object_meta(ms, names.cert(), labels(domain, "certificate"));
    cert
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::resources::tests::mail_server;

    #[test]
    fn test_deployment_shape() {
        let ms = mail_server(serde_json::json!({}));
        let deploy = deployment(&ms);
        assert_eq!(deploy.metadata.name.as_deref(), Some("mail-example-com"));
        assert_eq!(deploy.metadata.namespace.as_deref(), Some("mail"));
        let spec = deploy.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.containers[0].name, MAILSERVER_CONTAINER);
        assert_eq!(pod.containers[0].ports.as_ref().map(Vec::len), Some(8));
        assert_eq!(pod.init_containers.map(|c| c.len()), Some(1));
        let vols = pod.volumes.unwrap();
        assert_eq!(vols.len(), 2);
        assert!(pod.dns_config.is_none());
    }

    #[test]
    fn test_ldap_adds_override_volume_and_nameserver() {
        let ms = mail_server(serde_json::json!({
            "features": {"ldap": {"enabled": true, "nameserver": "10.0.0.53", "host": "ldap"}}
        }));
        let pod = deployment(&ms).spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.dns_policy.as_deref(), Some("None"));
        assert!(pod
            .volumes
            .unwrap()
            .iter()
            .any(|v| v.name == CONFIG_OVERRIDE_VOLUME));
        let data = config_override(&ms).data.unwrap();
        assert!(data.contains_key(LDAP_GROUPS_FILE));
    }

    #[test]
    fn test_service_ports_and_policy() {
        let ms = mail_server(serde_json::json!({"loadBalancerIP": "10.0.0.10"}));
        let svc = service(&ms).spec.unwrap();
        assert_eq!(svc.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(svc.external_traffic_policy.as_deref(), Some("Local"));
        assert_eq!(svc.load_balancer_ip.as_deref(), Some("10.0.0.10"));
        assert_eq!(svc.ports.unwrap().len(), 8);
    }

    #[test]
    fn test_claim_and_certificate() {
        let ms = mail_server(serde_json::json!({"volume": {"size": "5Gi"}}));
        let claim = data_claim(&ms);
        assert_eq!(claim.metadata.name.as_deref(), Some("example-com-data"));
        let requests = claim.spec.unwrap().resources.unwrap().requests.unwrap();
        assert_eq!(requests["storage"], Quantity("5Gi".to_string()));

        let cert = certificate(&ms);
        assert_eq!(cert.spec.secret_name, "example-com-tls");
        assert_eq!(cert.spec.dns_names, vec!["example.com", "mail.example.com"]);
    }

    #[test]
    fn test_credentials_secret() {
        let ms = mail_server(serde_json::json!({}));
        let secret = credentials_secret(&ms, "pw");
        let data = secret.data.unwrap();
        assert_eq!(data["email"].0, b"postmaster@example.com".to_vec());
        assert_eq!(data["password"].0, b"pw".to_vec());
    }
}
