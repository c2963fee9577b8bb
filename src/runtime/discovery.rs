//! # Discovery
//!
//! Checks at startup which API groups the cluster serves. The mail, cert-manager
//! and DNS groups are required; Traefik is optional and only enables the
//! `IngressRoute` and `Middleware` kinds.

use crate::controller::registry::KindRegistry;
use anyhow::{bail, Context, Result};
use kube::discovery::Discovery;
use kube::Client;
use tracing::{info, warn};

pub const REQUIRED_GROUPS: [&str; 3] = ["mail.linka.cloud", "cert-manager.io", "dns.linka.cloud"];
pub const TRAEFIK_GROUP: &str = "traefik.containo.us";

/// Required groups `served` does not know about
pub fn missing_groups(served: impl Fn(&str) -> bool) -> Vec<&'static str> {
    REQUIRED_GROUPS
        .iter()
        .copied()
        .filter(|group| !served(group))
        .collect()
}

/// Build the kind registry from what the cluster serves
pub async fn discover_registry(client: &Client) -> Result<KindRegistry> {
    let mut groups = REQUIRED_GROUPS.to_vec();
    groups.push(TRAEFIK_GROUP);
    let discovery = Discovery::new(client.clone())
        .filter(&groups)
        .run()
        .await
        .context("API discovery failed")?;

    let missing = missing_groups(|group| discovery.has_group(group));
    if !missing.is_empty() {
        bail!(
            "required API groups are not served by the cluster: {}",
            missing.join(", ")
        );
    }

    let traefik = discovery.has_group(TRAEFIK_GROUP);
    if traefik {
        info!("Traefik CRDs found, IngressRoute and Middleware are managed");
    } else {
        warn!("Traefik CRDs not found, MailServers with traefik.crds set will fail to apply their routes");
    }
    Ok(KindRegistry::new().with_traefik(traefik))
}
