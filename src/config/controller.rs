//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_MIN_SECS, DEFAULT_CHANGE_REQUEUE_SECS,
    DEFAULT_CONTROLLER_NAMESPACE, DEFAULT_EXEC_TIMEOUT_SECS, DEFAULT_METRICS_PORT,
    DEFAULT_PENDING_REQUEUE_SECS, DEFAULT_RESYNC_INTERVAL_SECS,
    DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
    DEFAULT_WATCH_BACKOFF_MAX_MS, DEFAULT_WATCH_BACKOFF_START_MS,
    DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS, DEFAULT_WATCH_RESTART_DELAY_SECS,
};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have defaults and can be overridden via environment variables,
/// typically populated from a ConfigMap with `envFrom` in the controller deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// How long the HTTP server may take to bind before startup fails
    pub server_startup_timeout_secs: u64,
    /// Readiness poll interval while waiting for the HTTP server
    pub server_poll_interval_ms: u64,
    /// Upper bound for one exec call into the mail workload
    pub exec_timeout_secs: u64,
    /// Requeue delay after a pass that wrote something
    pub change_requeue_secs: u64,
    /// Requeue delay while a dependency is not ready yet
    pub pending_requeue_secs: u64,
    /// Requeue delay after a converged pass
    pub resync_interval_secs: u64,
    /// Error backoff lower bound
    pub backoff_min_secs: u64,
    /// Error backoff upper bound
    pub backoff_max_secs: u64,
    /// Watch stream restart delay after unknown errors
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after the stream ends
    pub watch_restart_delay_after_end_secs: u64,
    /// First delay when the API server throttles the watch
    pub watch_backoff_start_ms: u64,
    pub watch_backoff_max_ms: u64,
    /// Namespace the controller runs in, also where the leader lease lives
    pub controller_namespace: String,
    /// Only the replica holding the leader lease reconciles
    pub leader_election: bool,
    /// Identity written into the leader lease
    pub pod_name: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            server_startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            server_poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
            exec_timeout_secs: DEFAULT_EXEC_TIMEOUT_SECS,
            change_requeue_secs: DEFAULT_CHANGE_REQUEUE_SECS,
            pending_requeue_secs: DEFAULT_PENDING_REQUEUE_SECS,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            watch_backoff_start_ms: DEFAULT_WATCH_BACKOFF_START_MS,
            watch_backoff_max_ms: DEFAULT_WATCH_BACKOFF_MAX_MS,
            controller_namespace: DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            leader_election: false,
            pod_name: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            metrics_port: parsed_or(&lookup, "METRICS_PORT", defaults.metrics_port),
            server_startup_timeout_secs: parsed_or(
                &lookup,
                "SERVER_STARTUP_TIMEOUT_SECS",
                defaults.server_startup_timeout_secs,
            ),
            server_poll_interval_ms: parsed_or(
                &lookup,
                "SERVER_POLL_INTERVAL_MS",
                defaults.server_poll_interval_ms,
            ),
            exec_timeout_secs: parsed_or(&lookup, "EXEC_TIMEOUT_SECS", defaults.exec_timeout_secs),
            change_requeue_secs: parsed_or(
                &lookup,
                "CHANGE_REQUEUE_SECS",
                defaults.change_requeue_secs,
            ),
            pending_requeue_secs: parsed_or(
                &lookup,
                "PENDING_REQUEUE_SECS",
                defaults.pending_requeue_secs,
            ),
            resync_interval_secs: parsed_or(
                &lookup,
                "RESYNC_INTERVAL_SECS",
                defaults.resync_interval_secs,
            ),
            backoff_min_secs: parsed_or(&lookup, "BACKOFF_MIN_SECS", defaults.backoff_min_secs),
            backoff_max_secs: parsed_or(&lookup, "BACKOFF_MAX_SECS", defaults.backoff_max_secs),
            watch_restart_delay_secs: parsed_or(
                &lookup,
                "WATCH_RESTART_DELAY_SECS",
                defaults.watch_restart_delay_secs,
            ),
            watch_restart_delay_after_end_secs: parsed_or(
                &lookup,
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                defaults.watch_restart_delay_after_end_secs,
            ),
            watch_backoff_start_ms: parsed_or(
                &lookup,
                "WATCH_BACKOFF_START_MS",
                defaults.watch_backoff_start_ms,
            ),
            watch_backoff_max_ms: parsed_or(
                &lookup,
                "WATCH_BACKOFF_MAX_MS",
                defaults.watch_backoff_max_ms,
            ),
            controller_namespace: lookup("POD_NAMESPACE")
                .filter(|ns| !ns.is_empty())
                .unwrap_or(defaults.controller_namespace),
            leader_election: parsed_or(&lookup, "LEADER_ELECT", defaults.leader_election),
            pod_name: lookup("POD_NAME")
                .or_else(|| lookup("HOSTNAME"))
                .filter(|name| !name.is_empty()),
        }
    }

    #[must_use]
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    #[must_use]
    pub fn change_requeue(&self) -> Duration {
        Duration::from_secs(self.change_requeue_secs)
    }

    #[must_use]
    pub fn pending_requeue(&self) -> Duration {
        Duration::from_secs(self.pending_requeue_secs)
    }

    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    #[must_use]
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    #[must_use]
    pub fn watch_restart_delay_after_end(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }
}

/// Parse a value from the lookup, falling back to `default` when missing or invalid
fn parsed_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = ControllerConfig::from_lookup(|_| None);
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.exec_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = ControllerConfig::from_lookup(lookup_from(&[
            ("METRICS_PORT", "9090"),
            ("EXEC_TIMEOUT_SECS", " 12 "),
            ("POD_NAMESPACE", "mail-system"),
        ]));
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.exec_timeout_secs, 12);
        assert_eq!(config.controller_namespace, "mail-system");
        assert!(!config.leader_election);
    }

    #[test]
    fn test_leader_election_identity() {
        let config = ControllerConfig::from_lookup(lookup_from(&[
            ("LEADER_ELECT", "true"),
            ("HOSTNAME", "mailserver-controller-7d9f-x2"),
        ]));
        assert!(config.leader_election);
        assert_eq!(config.pod_name.as_deref(), Some("mailserver-controller-7d9f-x2"));

        let config = ControllerConfig::from_lookup(lookup_from(&[
            ("POD_NAME", "controller-0"),
            ("HOSTNAME", "ignored"),
        ]));
        assert_eq!(config.pod_name.as_deref(), Some("controller-0"));
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = ControllerConfig::from_lookup(lookup_from(&[
            ("METRICS_PORT", "not-a-port"),
            ("RESYNC_INTERVAL_SECS", "-1"),
            ("POD_NAMESPACE", ""),
        ]));
        assert_eq!(config.metrics_port, DEFAULT_METRICS_PORT);
        assert_eq!(config.resync_interval_secs, DEFAULT_RESYNC_INTERVAL_SECS);
        assert_eq!(config.controller_namespace, DEFAULT_CONTROLLER_NAMESPACE);
    }
}
