use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::artifact::{content_hash, RepositoryLayout};
use crate::gate::GateConfig;
use crate::job::PollerConfig;
use crate::session::{Credentials, Secret, ServiceIdentity};

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub platform: PlatformConfig,
    /// Environments by name (e.g. "dev", "uat", "prd")
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// Asset platform connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlatformConfig {
    /// Default login endpoint, overridable per environment
    #[serde(default = "default_login_url")]
    pub login_url: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_platform_timeout")]
    pub timeout_secs: u64,
    /// Session lifetime assumed when the platform doesn't state one
    #[serde(default = "default_session_lease")]
    pub session_lease_secs: u64,
}

impl PlatformConfig {
    pub fn session_lease(&self) -> Duration {
        Duration::from_secs(self.session_lease_secs)
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            login_url: default_login_url(),
            timeout_secs: default_platform_timeout(),
            session_lease_secs: default_session_lease(),
        }
    }
}

fn default_login_url() -> String {
    "https://dm-us.informaticacloud.com/ma/api/v2/user/login".to_string()
}

fn default_platform_timeout() -> u64 {
    30
}

fn default_session_lease() -> u64 {
    1800 // 30 minutes
}

/// One deployment environment
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    /// Promotion into this environment requires an approved change ticket.
    /// Must be stated explicitly.
    pub protected: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<Secret>,
    /// Overrides `platform.login_url`
    #[serde(default)]
    pub login_url: Option<String>,
}

impl EnvironmentConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            secret: self.password.clone(),
        }
    }

    pub fn identity(&self, name: &str, platform: &PlatformConfig) -> ServiceIdentity {
        ServiceIdentity {
            environment: name.to_string(),
            login_url: self
                .login_url
                .clone()
                .unwrap_or_else(|| platform.login_url.clone()),
        }
    }
}

/// Artifact repository (Nexus raw) settings
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    /// Base URL (e.g. "https://nexus.example.com")
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_repository")]
    pub repository: String,
    /// Project folder; left empty, the binary fills it from `CI_PROJECT_NAME`
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Secret,
    #[serde(default = "default_repository_timeout")]
    pub timeout_secs: u64,
}

impl RepositoryConfig {
    pub fn layout(&self) -> RepositoryLayout {
        RepositoryLayout {
            repository: self.repository.clone(),
            project: if self.project.is_empty() {
                default_project()
            } else {
                self.project.clone()
            },
            artifact_name: self.artifact_name.clone(),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            repository: default_repository(),
            project: String::new(),
            artifact_name: default_artifact_name(),
            username: String::new(),
            password: Secret::default(),
            timeout_secs: default_repository_timeout(),
        }
    }
}

fn default_repository() -> String {
    "informatica-artifacts".to_string()
}

fn default_project() -> String {
    "local-project".to_string()
}

fn default_artifact_name() -> String {
    "informatica_assets".to_string()
}

fn default_repository_timeout() -> u64 {
    60
}

/// Ticket tracker (Jira) settings
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub token: Secret,
    #[serde(default = "default_tracker_timeout")]
    pub timeout_secs: u64,
    /// Ticket statuses that allow promotion (exact, case-sensitive)
    #[serde(default = "default_required_statuses")]
    pub required_statuses: Vec<String>,
    #[serde(default = "default_ticket_pattern")]
    pub ticket_pattern: String,
}

impl TrackerConfig {
    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            required_statuses: self.required_statuses.clone(),
            ticket_pattern: self.ticket_pattern.clone(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            token: Secret::default(),
            timeout_secs: default_tracker_timeout(),
            required_statuses: default_required_statuses(),
            ticket_pattern: default_ticket_pattern(),
        }
    }
}

fn default_tracker_timeout() -> u64 {
    30
}

fn default_required_statuses() -> Vec<String> {
    vec!["Approved".to_string()]
}

fn default_ticket_pattern() -> String {
    "[A-Z]+-[0-9]+".to_string()
}

/// Run ledger settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
    #[serde(default = "default_ledger_enabled")]
    pub enabled: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            enabled: default_ledger_enabled(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("promotion-ledger.db")
}

fn default_ledger_enabled() -> bool {
    true
}

/// Config with secrets redacted, for display and hashing
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub platform: PlatformConfig,
    pub environments: BTreeMap<String, SanitizedEnvironmentConfig>,
    pub poller: PollerConfig,
    pub repository: SanitizedRepositoryConfig,
    pub tracker: SanitizedTrackerConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedEnvironmentConfig {
    pub protected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub password_configured: bool,
    pub login_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedRepositoryConfig {
    pub url: String,
    pub repository: String,
    pub project: String,
    pub artifact_name: String,
    pub username: String,
    pub password_configured: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedTrackerConfig {
    pub url: String,
    pub username: String,
    pub token_configured: bool,
    pub timeout_secs: u64,
    pub required_statuses: Vec<String>,
    pub ticket_pattern: String,
}

impl SanitizedConfig {
    /// Stable digest of the effective (redacted) configuration.
    pub fn config_hash(&self) -> String {
        match serde_json::to_value(self).and_then(|value| serde_json::to_string(&value)) {
            Ok(json) => content_hash(json.as_bytes()),
            Err(_) => String::new(),
        }
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            platform: config.platform.clone(),
            environments: config
                .environments
                .iter()
                .map(|(name, env)| {
                    (
                        name.clone(),
                        SanitizedEnvironmentConfig {
                            protected: env.protected,
                            username: env.username.clone(),
                            password_configured: env
                                .password
                                .as_ref()
                                .is_some_and(|p| !p.is_empty()),
                            login_url: env.identity(name, &config.platform).login_url,
                        },
                    )
                })
                .collect(),
            poller: config.poller.clone(),
            repository: SanitizedRepositoryConfig {
                url: config.repository.url.clone(),
                repository: config.repository.repository.clone(),
                project: config.repository.layout().project,
                artifact_name: config.repository.artifact_name.clone(),
                username: config.repository.username.clone(),
                password_configured: !config.repository.password.is_empty(),
                timeout_secs: config.repository.timeout_secs,
            },
            tracker: SanitizedTrackerConfig {
                url: config.tracker.url.clone(),
                username: config.tracker.username.clone(),
                token_configured: !config.tracker.token.is_empty(),
                timeout_secs: config.tracker.timeout_secs,
                required_statuses: config.tracker.required_statuses.clone(),
                ticket_pattern: config.tracker.ticket_pattern.clone(),
            },
            ledger: config.ledger.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[platform]
timeout_secs = 10

[environments.dev]
protected = false
username = "dev-svc"
password = "dev-secret"

[environments.prd]
protected = true
username = "prd-svc"
password = "prd-secret"
login_url = "https://emea.informaticacloud.com/ma/api/v2/user/login"

[poller]
poll_interval_ms = 2000
max_attempts = 10

[poller.status_mapping]
succeeded = ["SUCCESSFUL"]
failed = ["FAILED"]

[repository]
url = "https://nexus.example.com"
project = "sales-etl"
username = "ci"
password = "nexus-secret"

[tracker]
url = "https://jira.example.com"
username = "ci"
token = "jira-token"
required_statuses = ["Approved", "Done"]
"#;

    #[test]
    fn test_deserialize_full_config() {
        let config: Config = toml::from_str(FULL).unwrap();
        assert_eq!(config.platform.timeout_secs, 10);
        assert_eq!(config.platform.session_lease_secs, 1800);
        assert_eq!(config.environments.len(), 2);
        assert!(config.environments["prd"].protected);
        assert!(!config.environments["dev"].protected);
        assert_eq!(config.poller.poll_interval_ms, 2000);
        assert_eq!(config.poller.initial_delay_ms, 1000);
        assert_eq!(config.repository.repository, "informatica-artifacts");
        assert_eq!(config.tracker.required_statuses, vec!["Approved", "Done"]);
        assert_eq!(config.tracker.ticket_pattern, "[A-Z]+-[0-9]+");
        assert!(config.ledger.enabled);
    }

    #[test]
    fn test_protected_must_be_explicit() {
        let toml = r#"
[environments.uat]
username = "svc"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_environment_identity_and_credentials() {
        let config: Config = toml::from_str(FULL).unwrap();

        let dev = config.environments["dev"].identity("dev", &config.platform);
        assert_eq!(dev.login_url, default_login_url());

        let prd = config.environments["prd"].identity("prd", &config.platform);
        assert!(prd.login_url.starts_with("https://emea."));

        let creds = config.environments["prd"].credentials();
        assert!(creds.missing_fields().is_empty());
    }

    #[test]
    fn test_repository_layout_defaults_project() {
        let config = RepositoryConfig::default();
        let layout = config.layout();
        assert_eq!(layout.project, "local-project");
        assert_eq!(layout.artifact_name, "informatica_assets");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config: Config = toml::from_str(FULL).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("prd-secret"));
        assert!(!debug.contains("nexus-secret"));
        assert!(!debug.contains("jira-token"));
    }

    #[test]
    fn test_sanitized_config() {
        let config: Config = toml::from_str(FULL).unwrap();
        let sanitized = SanitizedConfig::from(&config);

        assert!(sanitized.environments["prd"].password_configured);
        assert!(sanitized.repository.password_configured);
        assert!(sanitized.tracker.token_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("prd-secret"));
        assert!(!json.contains("jira-token"));
    }

    #[test]
    fn test_config_hash_stable() {
        let config: Config = toml::from_str(FULL).unwrap();
        let a = SanitizedConfig::from(&config).config_hash();
        let b = SanitizedConfig::from(&config).config_hash();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
