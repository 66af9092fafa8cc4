//! Reconciler configuration.

use std::time::Duration;

/// Convergence polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceConfig {
    /// Total time to wait for a deployment version to settle.
    pub deadline: Duration,

    /// Pause between polls.
    pub poll_interval: Duration,

    /// Timeout for each poll's `get_deployment`.
    pub poll_timeout: Duration,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(4 * 60),
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-operation timeouts and the convergence budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// `get_deployment` outside of convergence polling.
    pub get_timeout: Duration,

    /// `deploy_deployment` and `update_deployment`.
    pub submit_timeout: Duration,

    /// `delete_deployment`.
    pub delete_timeout: Duration,

    /// `list_interfaces` liveness probe.
    pub liveness_timeout: Duration,

    /// Every ledger call.
    pub ledger_timeout: Duration,

    /// Every directory call.
    pub directory_timeout: Duration,

    pub convergence: ConvergenceConfig,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            get_timeout: Duration::from_secs(10),
            submit_timeout: Duration::from_secs(4 * 60),
            delete_timeout: Duration::from_secs(60),
            liveness_timeout: Duration::from_secs(10),
            ledger_timeout: Duration::from_secs(60),
            directory_timeout: Duration::from_secs(30),
            convergence: ConvergenceConfig::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Every variable is a whole number of seconds:
    /// `GRID_GET_TIMEOUT`, `GRID_SUBMIT_TIMEOUT`, `GRID_DELETE_TIMEOUT`,
    /// `GRID_LIVENESS_TIMEOUT`, `GRID_LEDGER_TIMEOUT`, `GRID_DIRECTORY_TIMEOUT`,
    /// `GRID_CONVERGENCE_DEADLINE`, `GRID_POLL_INTERVAL`, `GRID_POLL_TIMEOUT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            get_timeout: secs("GRID_GET_TIMEOUT", defaults.get_timeout),
            submit_timeout: secs("GRID_SUBMIT_TIMEOUT", defaults.submit_timeout),
            delete_timeout: secs("GRID_DELETE_TIMEOUT", defaults.delete_timeout),
            liveness_timeout: secs("GRID_LIVENESS_TIMEOUT", defaults.liveness_timeout),
            ledger_timeout: secs("GRID_LEDGER_TIMEOUT", defaults.ledger_timeout),
            directory_timeout: secs("GRID_DIRECTORY_TIMEOUT", defaults.directory_timeout),
            convergence: ConvergenceConfig {
                deadline: secs("GRID_CONVERGENCE_DEADLINE", defaults.convergence.deadline),
                poll_interval: secs("GRID_POLL_INTERVAL", defaults.convergence.poll_interval),
                poll_timeout: secs("GRID_POLL_TIMEOUT", defaults.convergence.poll_timeout),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciler_config_default() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.submit_timeout, Duration::from_secs(240));
        assert_eq!(config.convergence.deadline, Duration::from_secs(240));
        assert_eq!(config.convergence.poll_interval, Duration::from_secs(1));
        assert_eq!(config.convergence.poll_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_reconciler_config_lookup_overrides() {
        let config = ReconcilerConfig::from_lookup(|key| match key {
            "GRID_CONVERGENCE_DEADLINE" => Some("30".to_string()),
            "GRID_LEDGER_TIMEOUT" => Some("not-a-number".to_string()),
            _ => None,
        });
        assert_eq!(config.convergence.deadline, Duration::from_secs(30));
        assert_eq!(config.ledger_timeout, Duration::from_secs(60));
    }
}
