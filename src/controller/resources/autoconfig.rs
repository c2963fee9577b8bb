//! Autoconfig / autodiscover companion: certificate, workload, service, SRV
//! record and HTTP routing (plain ingress or Traefik routes).

use super::naming::{labels, Names};
use super::object_meta;
use crate::crd::{
    fqdn, Certificate, CertificateSpec, DnsRecord, DnsRecordSpec, IngressRoute,
    IngressRouteSpec, MailServer, Middleware, MiddlewareRef, MiddlewareSpec, RedirectScheme,
    Route, RouteService, RouteTls, SrvRecord, TraefikEntrypoints,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

const AUTOCONFIG_PORT: i32 = 1323;
const HTTP_PORT: i32 = 80;
const TRAEFIK_ENTRYPOINTS_ANNOTATION: &str = "traefik.ingress.kubernetes.io/router.entrypoints";
const TRAEFIK_TLS_ANNOTATION: &str = "traefik.ingress.kubernetes.io/router.tls";

fn hosts(domain: &str) -> [String; 2] {
    [format!("autoconfig.{domain}"), format!("autodiscover.{domain}")]
}

fn entrypoints(ms: &MailServer) -> TraefikEntrypoints {
    ms.spec
        .traefik
        .as_ref()
        .map(|t| t.entrypoints.clone())
        .unwrap_or_default()
}

#[must_use]
pub fn certificate(ms: &MailServer) -> Certificate {
    let domain = &ms.spec.domain;
    let names = Names::new(domain);
    let [autoconfig, autodiscover] = hosts(domain);
    let mut cert = Certificate::new(
        &names.autoconfig(),
        CertificateSpec {
            common_name: Some(autoconfig.clone()),
            dns_names: vec![autoconfig, autodiscover],
            secret_name: names.autoconfig_tls(),
            issuer_ref: ms.spec.issuer_ref.clone(),
        },
    );
    cert.metadata = object_meta(ms, names.autoconfig(), labels(domain, "autoconfig-certs"));
    cert
}

#[must_use]
pub fn deployment(ms: &MailServer) -> Deployment {
    let spec = &ms.spec;
    let domain = &spec.domain;
    let settings = &spec.autoconfig.deployment;
    let pod_labels = labels(domain, "autoconfig");
    let annotations = (!settings.annotations.is_empty()).then(|| settings.annotations.clone());

    let mut env = vec![
        EnvVar {
            name: "DOMAIN".to_string(),
            value: Some(domain.clone()),
            ..Default::default()
        },
        EnvVar {
            name: "IMAP_SERVER".to_string(),
            value: Some(format!("mail.{domain}")),
            ..Default::default()
        },
        EnvVar {
            name: "SMTP_SERVER".to_string(),
            value: Some(format!("mail.{domain}")),
            ..Default::default()
        },
    ];
    env.extend(settings.env.iter().cloned());

    let container = Container {
        name: "autoconfig".to_string(),
        image: Some(spec.autoconfig_image().to_string()),
        resources: settings.resources.clone(),
        env: Some(env),
        ports: Some(vec![ContainerPort {
            container_port: AUTOCONFIG_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: (!settings.volume_mounts.is_empty()).then(|| settings.volume_mounts.clone()),
        ..Default::default()
    };

    let mut metadata = object_meta(ms, Names::new(domain).autoconfig(), pod_labels.clone());
    metadata.annotations = annotations.clone();

    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas()),
            strategy: settings.strategy.clone(),
            selector: LabelSelector {
                match_labels: Some(pod_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations,
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: settings.service_account_name.clone(),
                    affinity: settings.affinity.clone(),
                    security_context: settings.security_context.clone(),
                    topology_spread_constraints: (!settings.topology_spread_constraints.is_empty())
                        .then(|| settings.topology_spread_constraints.clone()),
                    tolerations: (!settings.tolerations.is_empty())
                        .then(|| settings.tolerations.clone()),
                    node_selector: (!settings.node_selector.is_empty())
                        .then(|| settings.node_selector.clone()),
                    restart_policy: Some("Always".to_string()),
                    containers: vec![container],
                    volumes: (!settings.volumes.is_empty()).then(|| settings.volumes.clone()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[must_use]
pub fn service(ms: &MailServer) -> Service {
    let domain = &ms.spec.domain;
    Service {
        metadata: object_meta(ms, Names::new(domain).autoconfig(), labels(domain, "service")),
        spec: Some(ServiceSpec {
            selector: Some(labels(domain, "autoconfig")),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: HTTP_PORT,
                target_port: Some(IntOrString::Int(AUTOCONFIG_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `_autodiscover._tcp.<domain>` → `autodiscover.<domain>:443`
#[must_use]
pub fn srv_record(ms: &MailServer) -> DnsRecord {
    let domain = &ms.spec.domain;
    let name = Names::new(domain).autoconfig();
    let mut rec = DnsRecord::new(
        &name,
        DnsRecordSpec {
            srv: Some(SrvRecord {
                name: fqdn(&format!("_autodiscover._tcp.{domain}")),
                ttl: ms.spec.dns_ttl,
                priority: 10,
                weight: 10,
                port: 443,
                target: fqdn(&format!("autodiscover.{domain}")),
            }),
            ..Default::default()
        },
    );
    rec.metadata = object_meta(ms, name, labels(domain, "autoconfig-record"));
    rec
}

/// Plain ingress for both autoconfig hosts, TLS terminated with the
/// autoconfig certificate
#[must_use]
pub fn ingress(ms: &MailServer) -> Ingress {
    let domain = &ms.spec.domain;
    let names = Names::new(domain);
    let mut annotations = BTreeMap::new();
    if let Some(traefik) = &ms.spec.traefik {
        annotations.insert(
            TRAEFIK_ENTRYPOINTS_ANNOTATION.to_string(),
            traefik.entrypoints.https.clone(),
        );
        annotations.insert(TRAEFIK_TLS_ANNOTATION.to_string(), "true".to_string());
    }
    annotations.extend(ms.spec.autoconfig.ingress.annotations.clone());

    let hosts = hosts(domain);
    let rules = hosts
        .iter()
        .map(|host| IngressRule {
            host: Some(host.clone()),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some("/".to_string()),
                    path_type: "ImplementationSpecific".to_string(),
                    backend: IngressBackend {
                        service: Some(IngressServiceBackend {
                            name: names.autoconfig(),
                            port: Some(ServiceBackendPort {
                                number: Some(HTTP_PORT),
                                ..Default::default()
                            }),
                        }),
                        ..Default::default()
                    },
                }],
            }),
        })
        .collect();

    let mut metadata = object_meta(ms, names.autoconfig(), labels(domain, "ingress"));
    metadata.annotations = Some(annotations);

    Ingress {
        metadata,
        spec: Some(IngressSpec {
            rules: Some(rules),
            tls: Some(vec![IngressTLS {
                hosts: Some(hosts.to_vec()),
                secret_name: Some(names.autoconfig_tls()),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn host_rule(domain: &str) -> String {
    let [autoconfig, autodiscover] = hosts(domain);
    format!("Host(`{autoconfig}`) || Host(`{autodiscover}`)")
}

/// HTTP route redirecting to HTTPS
#[must_use]
pub fn http_route(ms: &MailServer) -> IngressRoute {
    let domain = &ms.spec.domain;
    let names = Names::new(domain);
    let mut route = IngressRoute::new(
        &names.autoconfig(),
        IngressRouteSpec {
            entry_points: vec![entrypoints(ms).http],
            routes: vec![Route {
                match_rule: host_rule(domain),
                kind: "Rule".to_string(),
                middlewares: vec![MiddlewareRef {
                    name: names.redirect(),
                    namespace: None,
                }],
                services: vec![RouteService {
                    name: names.autoconfig(),
                    port: HTTP_PORT,
                    pass_host_header: Some(true),
                }],
            }],
            tls: None,
        },
    );
    route.metadata = object_meta(ms, names.autoconfig(), labels(domain, "http-route"));
    route
}

#[must_use]
pub fn https_route(ms: &MailServer) -> IngressRoute {
    let domain = &ms.spec.domain;
    let names = Names::new(domain);
    let mut route = IngressRoute::new(
        &names.autoconfig_tls(),
        IngressRouteSpec {
            entry_points: vec![entrypoints(ms).https],
            routes: vec![Route {
                match_rule: host_rule(domain),
                kind: "Rule".to_string(),
                middlewares: Vec::new(),
                services: vec![RouteService {
                    name: names.autoconfig(),
                    port: HTTP_PORT,
                    pass_host_header: None,
                }],
            }],
            tls: Some(RouteTls {
                secret_name: names.autoconfig_tls(),
            }),
        },
    );
    route.metadata = object_meta(ms, names.autoconfig_tls(), labels(domain, "https-route"));
    route
}

#[must_use]
pub fn redirect_middleware(ms: &MailServer) -> Middleware {
    let domain = &ms.spec.domain;
    let names = Names::new(domain);
    let mut middleware = Middleware::new(
        &names.redirect(),
        MiddlewareSpec {
            redirect_scheme: Some(RedirectScheme {
                scheme: "https".to_string(),
                permanent: true,
            }),
        },
    );
    middleware.metadata = object_meta(ms, names.redirect(), labels(domain, "redirect-to-https"));
    middleware
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::resources::tests::mail_server;

    #[test]
    fn test_ingress_rules_and_traefik_annotations() {
        let ms = mail_server(serde_json::json!({}));
        let ing = ingress(&ms);
        assert_eq!(ing.metadata.annotations, Some(BTreeMap::new()));
        let spec = ing.spec.unwrap();
        assert_eq!(spec.rules.unwrap().len(), 2);
        assert_eq!(
            spec.tls.unwrap()[0].secret_name.as_deref(),
            Some("autoconfig-example-com-tls")
        );

        let ms = mail_server(serde_json::json!({
            "traefik": {"crds": false},
            "autoconfig": {"ingress": {"annotations": {"a": "b"}}}
        }));
        let annotations = ingress(&ms).metadata.annotations.unwrap();
        assert_eq!(annotations[TRAEFIK_ENTRYPOINTS_ANNOTATION], "websecure");
        assert_eq!(annotations[TRAEFIK_TLS_ANNOTATION], "true");
        assert_eq!(annotations["a"], "b");
    }

    #[test]
    fn test_routes() {
        let ms = mail_server(serde_json::json!({"traefik": {"crds": true}}));
        let http = http_route(&ms);
        assert_eq!(http.spec.entry_points, vec!["web"]);
        assert_eq!(
            http.spec.routes[0].match_rule,
            "Host(`autoconfig.example.com`) || Host(`autodiscover.example.com`)"
        );
        assert_eq!(http.spec.routes[0].middlewares[0].name, "redirect-to-https-example-com");

        let https = https_route(&ms);
        assert_eq!(https.metadata.name.as_deref(), Some("autoconfig-example-com-tls"));
        assert_eq!(https.spec.entry_points, vec!["websecure"]);
        assert!(https.spec.tls.is_some());
    }

    #[test]
    fn test_autoconfig_workload() {
        let ms = mail_server(serde_json::json!({"autoconfig": {"image": "registry/autoconfig:1"}}));
        let deploy = deployment(&ms);
        let pod = deploy.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), Some("registry/autoconfig:1"));
        let svc = service(&ms).spec.unwrap();
        assert_eq!(
            svc.ports.unwrap()[0].target_port,
            Some(IntOrString::Int(AUTOCONFIG_PORT))
        );
        let srv = srv_record(&ms).spec.srv.unwrap();
        assert_eq!(srv.target, "autodiscover.example.com.");
        assert_eq!(srv.port, 443);
    }
}
