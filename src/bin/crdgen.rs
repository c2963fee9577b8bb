//! # CRD Generator
//!
//! Prints the `MailServer` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/mailserver.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;
use mailserver_controller::crd::MailServer;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&MailServer::crd())?);
    Ok(())
}
