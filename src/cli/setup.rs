//! # Setup Command
//!
//! Resolves the running mail pod of a `MailServer` and runs `setup` in it
//! with the local terminal attached.

use anyhow::{anyhow, bail, Context, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use mailserver_controller::constants::MAILSERVER_CONTAINER;
use mailserver_controller::controller::exec::KubeExecutor;
use mailserver_controller::controller::resources::Names;
use mailserver_controller::controller::store::label_selector;
use mailserver_controller::crd::MailServer;
use regex::bytes::Regex;
use std::sync::LazyLock;

/// Paths the image prints in its usage text, shown as the plugin command instead
static SETUP_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/usr/local/bin/setup|\./setup\.sh|\./setup( )").expect("setup path pattern")
});

/// Show `setup` wherever the image prints its own script path
pub fn rewrite_setup_paths(chunk: &[u8]) -> Vec<u8> {
    SETUP_PATH.replace_all(chunk, &b"setup${1}"[..]).into_owned()
}

/// The shell command run in the container
pub fn setup_command_line(args: &[String]) -> Vec<String> {
    let mut line = vec!["setup".to_string()];
    line.extend(args.iter().cloned());
    vec!["sh".to_string(), "-c".to_string(), line.join(" ")]
}

/// First `Running` pod in name order
pub fn first_running(mut pods: Vec<Pod>) -> Option<Pod> {
    pods.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    pods.into_iter().find(|pod| {
        pod.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|phase| phase == "Running")
    })
}

/// Run `setup <args>` in the mail pod of `instance`
pub async fn setup_command(
    client: Client,
    namespace: &str,
    instance: &str,
    args: Vec<String>,
    attach_stdin: bool,
) -> Result<()> {
    let ms = Api::<MailServer>::namespaced(client.clone(), namespace)
        .get(instance)
        .await
        .with_context(|| format!("Failed to get MailServer {namespace}/{instance}"))?;
    let domain = ms
        .status
        .as_ref()
        .and_then(|s| s.domain.clone())
        .unwrap_or_else(|| ms.spec.domain.clone());
    let workload = Names::new(&domain).mail();

    let deploy = Api::<Deployment>::namespaced(client.clone(), namespace)
        .get(&workload)
        .await
        .with_context(|| format!("Failed to get Deployment {namespace}/{workload}"))?;
    let labels = deploy
        .spec
        .and_then(|spec| spec.template.metadata)
        .and_then(|meta| meta.labels)
        .unwrap_or_default();
    if labels.is_empty() {
        bail!("Deployment {workload} has no pod labels");
    }

    let pods = Api::<Pod>::namespaced(client.clone(), namespace)
        .list(&ListParams::default().labels(&label_selector(&labels)))
        .await
        .context("Failed to list mail pods")?;
    if pods.items.is_empty() {
        bail!("no pods found");
    }
    let pod = first_running(pods.items).ok_or_else(|| anyhow!("no running pods found"))?;
    let pod_name = pod
        .metadata
        .name
        .ok_or_else(|| anyhow!("running pod has no name"))?;

    let stdin = attach_stdin.then(tokio::io::stdin);
    KubeExecutor::new(client)
        .exec_streaming(
            namespace,
            &pod_name,
            MAILSERVER_CONTAINER,
            setup_command_line(&args),
            stdin,
            tokio::io::stdout(),
            tokio::io::stderr(),
            rewrite_setup_paths,
        )
        .await?;
    Ok(())
}
