//! Job poller configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the job poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Time between status checks (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Status checks allowed before a job is declared timed out.
    /// Transport errors during polling count against this ceiling.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Grace period before the first status check (milliseconds).
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound on a single status call (milliseconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// How remote state strings map onto local job statuses.
    #[serde(default)]
    pub status_mapping: StatusMapping,
}

fn default_poll_interval() -> u64 {
    5000 // 5 seconds
}

fn default_max_attempts() -> u32 {
    60
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    30_000
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            request_timeout_ms: default_request_timeout(),
            status_mapping: StatusMapping::default(),
        }
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Classification of a remote job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Running,
    Succeeded,
    Failed,
}

/// Remote state strings considered terminal. Matching is case-insensitive;
/// anything not listed counts as still running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMapping {
    #[serde(default = "default_succeeded")]
    pub succeeded: Vec<String>,
    #[serde(default = "default_failed")]
    pub failed: Vec<String>,
}

fn default_succeeded() -> Vec<String> {
    ["SUCCESSFUL", "SUCCESS", "COMPLETED"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_failed() -> Vec<String> {
    // A WARNING export/import left some assets behind.
    ["FAILED", "ERROR", "CANCELLED", "WARNING"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for StatusMapping {
    fn default() -> Self {
        Self {
            succeeded: default_succeeded(),
            failed: default_failed(),
        }
    }
}

impl StatusMapping {
    pub fn classify(&self, remote_state: &str) -> RemoteState {
        let state = remote_state.trim();
        if self.succeeded.iter().any(|s| s.eq_ignore_ascii_case(state)) {
            RemoteState::Succeeded
        } else if self.failed.iter().any(|s| s.eq_ignore_ascii_case(state)) {
            RemoteState::Failed
        } else {
            RemoteState::Running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PollerConfig::default();
        assert_eq!(config.poll_interval_ms, 5000);
        assert_eq!(config.max_attempts, 60);
        assert_eq!(config.initial_delay_ms, 1000);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            max_attempts = 5
        "#;
        let config: PollerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.poll_interval_ms, 5000);
        assert_eq!(
            config.status_mapping.classify("SUCCESSFUL"),
            RemoteState::Succeeded
        );
    }

    #[test]
    fn test_deserialize_custom_mapping() {
        let toml = r#"
            poll_interval_ms = 250
            [status_mapping]
            succeeded = ["DONE", "PARTIAL_SUCCESS"]
        "#;
        let config: PollerConfig = toml::from_str(toml).unwrap();
        let mapping = &config.status_mapping;
        assert_eq!(mapping.classify("done"), RemoteState::Succeeded);
        assert_eq!(mapping.classify("PARTIAL_SUCCESS"), RemoteState::Succeeded);
        assert_eq!(mapping.classify("SUCCESSFUL"), RemoteState::Running);
        assert_eq!(mapping.classify("FAILED"), RemoteState::Failed);
    }

    #[test]
    fn test_classify_defaults() {
        let mapping = StatusMapping::default();
        assert_eq!(mapping.classify("IN_PROGRESS"), RemoteState::Running);
        assert_eq!(mapping.classify("QUEUED"), RemoteState::Running);
        assert_eq!(mapping.classify(" successful "), RemoteState::Succeeded);
        assert_eq!(mapping.classify("WARNING"), RemoteState::Failed);
        assert_eq!(mapping.classify("Failed"), RemoteState::Failed);
    }
}
