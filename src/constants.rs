//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Durations here are defaults; `ControllerConfig::from_env` can override them.

/// Finalizer placed on every `MailServer` before any dependent object is created
pub const FINALIZER: &str = "mail.linka.cloud/finalizer";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "kube-mailserver";

/// Pod template annotation carrying the sha256 of the rendered config secret
pub const CONFIG_SECRET_HASH_ANNOTATION: &str = "linka.cloud/kube-mailserver-config-secret-hash";

/// Container the extraction commands run in
pub const MAILSERVER_CONTAINER: &str = "mailserver";

/// Keys expected in the LDAP bind secret
pub const LDAP_BIND_DN_KEY: &str = "bindDN";
pub const LDAP_BIND_PW_KEY: &str = "bindPW";

/// Command used to learn the public address of the running workload
pub const PUBLIC_IP_COMMAND: &str = "curl ifconfig.me";

/// Directory where the workload keeps its generated DKIM keys, one folder per domain
pub const DKIM_KEY_DIR: &str = "/etc/opendkim/keys";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Upper bound for a single exec call into the workload
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;

/// Requeue delay after a pass performed a write
pub const DEFAULT_CHANGE_REQUEUE_SECS: u64 = 2;

/// Requeue delay while waiting on a dependency (no pod, no address)
pub const DEFAULT_PENDING_REQUEUE_SECS: u64 = 15;

/// Requeue delay after a fully converged pass
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Error backoff bounds (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Watch throttling backoff bounds (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_START_MS: u64 = 2000;
pub const DEFAULT_WATCH_BACKOFF_MAX_MS: u64 = 30000;

/// Namespace used when `POD_NAMESPACE` is not set
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "kube-mailserver-system";

/// Lease coordinating replicas when leader election is enabled
pub const LEADER_LEASE_NAME: &str = "ee12b95d.mail.linka.cloud";

/// Leader lease timing (seconds)
pub const LEADER_LEASE_DURATION_SECS: u64 = 30;
pub const LEADER_RENEW_SECS: u64 = 10;
pub const LEADER_RETRY_SECS: u64 = 5;

/// TTL applied to DNS records that do not set one
pub const DEFAULT_DNS_TTL: u32 = 3600;
