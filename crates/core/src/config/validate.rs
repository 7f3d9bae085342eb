use regex_lite::Regex;

use super::{types::Config, ConfigError};

/// Validate cross-field rules serde can't express
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.environments.is_empty() {
        return Err(invalid("at least one environment must be configured"));
    }

    for (name, env) in &config.environments {
        if env.identity(name, &config.platform).login_url.trim().is_empty() {
            return Err(invalid(format!(
                "environments.{} has no login_url and platform.login_url is empty",
                name
            )));
        }
    }

    if config.poller.poll_interval_ms == 0 {
        return Err(invalid("poller.poll_interval_ms must be greater than 0"));
    }
    if config.poller.max_attempts == 0 {
        return Err(invalid("poller.max_attempts must be greater than 0"));
    }

    if config.tracker.required_statuses.is_empty() {
        return Err(invalid("tracker.required_statuses cannot be empty"));
    }
    if let Err(e) = Regex::new(&config.tracker.ticket_pattern) {
        return Err(invalid(format!("tracker.ticket_pattern is invalid: {}", e)));
    }

    let repo = &config.repository;
    for (field, value) in [
        ("url", &repo.url),
        ("repository", &repo.repository),
        ("artifact_name", &repo.artifact_name),
    ] {
        if value.trim().is_empty() {
            return Err(invalid(format!("repository.{} cannot be empty", field)));
        }
    }
    if repo.username.trim().is_empty() || repo.password.is_empty() {
        return Err(invalid(
            "repository.username and repository.password must be set",
        ));
    }

    if let Some(name) = config
        .environments
        .iter()
        .find_map(|(name, env)| env.protected.then_some(name))
    {
        let tracker = &config.tracker;
        let mut missing = Vec::new();
        if tracker.url.trim().is_empty() {
            missing.push("url");
        }
        if tracker.username.trim().is_empty() {
            missing.push("username");
        }
        if tracker.token.is_empty() {
            missing.push("token");
        }
        if !missing.is_empty() {
            return Err(invalid(format!(
                "environments.{} is protected but tracker {} not set",
                name,
                missing.join(", ")
            )));
        }
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    const VALID: &str = r#"
[environments.dev]
protected = false

[environments.prd]
protected = true

[repository]
url = "https://nexus.example.com"
username = "ci-publisher"
password = "nexus-pw"

[tracker]
url = "https://jira.example.com"
username = "ci-bot"
token = "jira-token"
"#;

    fn config_with(extra: &str) -> crate::config::Config {
        load_config_from_str(&format!("{}\n{}", VALID, extra)).unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&config_with("")).is_ok());
    }

    #[test]
    fn test_no_environments_fails() {
        let config = load_config_from_str(
            "[repository]\nurl = \"https://n\"\nusername = \"u\"\npassword = \"p\"\n",
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("at least one environment"));
    }

    #[test]
    fn test_zero_poll_settings_fail() {
        let config = config_with("[poller]\npoll_interval_ms = 0\n");
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError(_))
        ));

        let config = config_with("[poller]\nmax_attempts = 0\n");
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_tracker_rules() {
        let mut config = config_with("");
        config.tracker.required_statuses.clear();
        assert!(validate_config(&config).is_err());

        let mut config = config_with("");
        config.tracker.ticket_pattern = "([A-Z".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("ticket_pattern"));
    }

    #[test]
    fn test_empty_repository_url_fails() {
        let config = load_config_from_str("[environments.dev]\nprotected = false\n").unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("repository.url"));
    }

    #[test]
    fn test_empty_login_url_fails() {
        let config = config_with("[platform]\nlogin_url = \"\"\n");
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("login_url"));
    }

    #[test]
    fn test_missing_repository_credentials_fail() {
        let config = load_config_from_str(
            r#"
[environments.dev]
protected = false

[repository]
url = "https://nexus.example.com"
username = "ci-publisher"
"#,
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("repository.password"));

        let config = load_config_from_str(
            r#"
[environments.dev]
protected = false

[repository]
url = "https://nexus.example.com"
password = "nexus-pw"
"#,
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("repository.username"));
        assert!(!err.to_string().contains("nexus-pw"));
    }

    #[test]
    fn test_protected_environment_requires_tracker_credentials() {
        let config = load_config_from_str(
            r#"
[environments.prd]
protected = true

[repository]
url = "https://nexus.example.com"
username = "ci-publisher"
password = "nexus-pw"
"#,
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("environments.prd"), "{}", message);
        assert!(message.contains("url, username, token"), "{}", message);

        let mut config = config_with("");
        config.tracker.token = crate::session::Secret::new("");
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().ends_with("tracker token not set"));
    }

    #[test]
    fn test_tracker_credentials_optional_without_protected_environment() {
        let config = load_config_from_str(
            r#"
[environments.dev]
protected = false

[environments.uat]
protected = false

[repository]
url = "https://nexus.example.com"
username = "ci-publisher"
password = "nexus-pw"
"#,
        )
        .unwrap();
        assert!(config.tracker.url.is_empty());
        assert!(validate_config(&config).is_ok());
    }
}
