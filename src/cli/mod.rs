//! # kubectl-mailserver
//!
//! kubectl plugin running docker-mailserver `setup` commands inside the
//! workload of a `MailServer`.
//!
//! ## Usage
//!
//! ```bash
//! # List mailboxes of the `example` instance
//! kubectl mailserver example email list
//!
//! # Add a mailbox, reading nothing from stdin
//! kubectl mailserver -n mail example email add user@example.com 's3cret'
//!
//! # Feed stdin to the command
//! kubectl mailserver -i example config dkim < keys.txt
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use kube::config::{Config, KubeConfigOptions};
use kube::Client;

mod setup;

/// Run docker-mailserver setup commands in a MailServer instance
#[derive(Parser)]
#[command(name = "kubectl-mailserver")]
#[command(
    about = "Run docker-mailserver setup commands in a MailServer instance",
    long_about = None,
    after_help = "\
Flags go before the instance name; everything after it is passed to `setup`.

Examples:
  kubectl mailserver example email list
  kubectl mailserver -n mail example alias add postmaster@example.com admin@example.com
"
)]
struct Cli {
    /// Kubernetes namespace (defaults to current context namespace)
    #[arg(short, long)]
    namespace: Option<String>,

    /// Kubernetes context to use
    #[arg(long)]
    context: Option<String>,

    /// Pass stdin to the setup command
    #[arg(short = 'i', long)]
    stdin: bool,

    /// Name of the MailServer resource
    #[arg(value_name = "INSTANCE")]
    instance: String,

    /// Arguments of the `setup` command
    #[arg(value_name = "SETUP_ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.context {
        Some(context) => Config::from_kubeconfig(&KubeConfigOptions {
            context: Some(context.clone()),
            ..Default::default()
        })
        .await
        .with_context(|| format!("Failed to load kubeconfig context {context}"))?,
        None => Config::infer()
            .await
            .context("Failed to load Kubernetes configuration. Ensure kubeconfig is configured.")?,
    };
    let namespace = cli
        .namespace
        .clone()
        .unwrap_or_else(|| config.default_namespace.clone());
    let client = Client::try_from(config).context("Failed to create Kubernetes client")?;

    setup::setup_command(client, &namespace, &cli.instance, cli.args, cli.stdin).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_args_follow_the_instance() {
        let cli = Cli::parse_from([
            "kubectl-mailserver",
            "-n",
            "mail",
            "example",
            "email",
            "add",
            "user@example.com",
            "--force",
        ]);
        assert_eq!(cli.namespace.as_deref(), Some("mail"));
        assert_eq!(cli.instance, "example");
        assert_eq!(cli.args, ["email", "add", "user@example.com", "--force"]);
        assert!(!cli.stdin);
    }

    #[test]
    fn test_instance_is_required() {
        assert!(Cli::try_parse_from(["kubectl-mailserver"]).is_err());
    }
}
