//! Orchestrator configuration.

use std::collections::BTreeMap;

use crate::artifact::RepositoryLayout;
use crate::config::{Config, EnvironmentConfig, PlatformConfig};
use crate::gate::GateConfig;
use crate::job::PollerConfig;

/// Everything a run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Login defaults and the session lease.
    pub platform: PlatformConfig,
    /// Environments by name, with credentials and the protected flag.
    pub environments: BTreeMap<String, EnvironmentConfig>,
    pub poller: PollerConfig,
    pub layout: RepositoryLayout,
    pub gate: GateConfig,
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            platform: config.platform.clone(),
            environments: config.environments.clone(),
            poller: config.poller.clone(),
            layout: config.repository.layout(),
            gate: config.tracker.gate_config(),
        }
    }
}

impl OrchestratorConfig {
    pub fn environment(&self, name: &str) -> Option<&EnvironmentConfig> {
        self.environments.get(name)
    }

    /// Whether promotion into `name` needs gate approval. Unknown is `None`.
    pub fn is_protected(&self, name: &str) -> Option<bool> {
        self.environment(name).map(|env| env.protected)
    }
}
