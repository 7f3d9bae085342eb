//! Testing utilities and mock implementations.
//!
//! Mock implementations of the three external collaborator traits, so the
//! whole pipeline can be driven without real infrastructure.
//!
//! # Example
//!
//! ```rust,ignore
//! use promotion_core::testing::{MockPlatform, MockRepository, MockTracker, StatusStep};
//!
//! let platform = Arc::new(MockPlatform::new());
//! let repository = Arc::new(MockRepository::new());
//! let tracker = Arc::new(MockTracker::new());
//!
//! tracker.set_status("OPS-1", "Approved").await;
//! platform
//!     .set_status_script(JobKind::Export, vec![StatusStep::state("SUCCESSFUL")])
//!     .await;
//! ```

mod mock_platform;
mod mock_repository;
mod mock_tracker;

pub use mock_platform::{MockPlatform, RecordedSubmission, StatusStep};
pub use mock_repository::MockRepository;
pub use mock_tracker::MockTracker;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::collections::BTreeMap;

    use chrono::{Duration, Utc};

    use crate::artifact::{AssetManifest, AssetRef, ExportedFile, RepositoryLayout};
    use crate::config::{EnvironmentConfig, PlatformConfig};
    use crate::gate::{GateConfig, TriggerContext};
    use crate::job::PollerConfig;
    use crate::orchestrator::OrchestratorConfig;
    use crate::platform::ImportPackage;
    use crate::session::{Secret, Session};

    /// A manifest listing `count` assets.
    pub fn asset_manifest(count: usize) -> AssetManifest {
        AssetManifest::new(
            "release",
            (1..=count)
                .map(|i| {
                    AssetRef::new(format!("asset-{}", i))
                        .with_path(format!("Default/Folder/Taskflow{}", i))
                        .with_type("TASKFLOW")
                })
                .collect(),
        )
    }

    /// Files as produced by an export download.
    pub fn exported_files() -> Vec<ExportedFile> {
        vec![ExportedFile::new(
            "export_package.zip",
            b"PK\x03\x04fixture-export".to_vec(),
        )]
    }

    /// A session valid for an hour.
    pub fn session(environment: &str) -> Session {
        let now = Utc::now();
        Session {
            credential_token: Secret::new("fixture-token"),
            api_endpoint: "https://mock.platform/saas".to_string(),
            environment: environment.to_string(),
            issued_at: now,
            expiry: now + Duration::hours(1),
        }
    }

    /// A session whose lease has already run out.
    pub fn expired_session(environment: &str) -> Session {
        let now = Utc::now();
        Session {
            issued_at: now - Duration::hours(2),
            expiry: now - Duration::hours(1),
            ..session(environment)
        }
    }

    pub fn import_package() -> ImportPackage {
        ImportPackage {
            content_hash: "0".repeat(64),
            version_label: "a1b2c3d".to_string(),
            files: exported_files(),
        }
    }

    pub fn repository_layout() -> RepositoryLayout {
        RepositoryLayout {
            repository: "informatica-artifacts".to_string(),
            project: "sales-etl".to_string(),
            artifact_name: "informatica_assets".to_string(),
        }
    }

    /// Trigger whose commit message references `ticket`.
    pub fn trigger(ticket: &str) -> TriggerContext {
        TriggerContext::new()
            .with_commit_message(format!("{} promote new taskflows", ticket))
            .with_commit_sha("a1b2c3d")
            .with_actor("ci-bot")
    }

    pub fn environment(protected: bool) -> EnvironmentConfig {
        EnvironmentConfig {
            protected,
            username: Some("svc-user".to_string()),
            password: Some(Secret::new("svc-password")),
            login_url: None,
        }
    }

    /// Polling that finishes in milliseconds.
    pub fn fast_poller(max_attempts: u32) -> PollerConfig {
        PollerConfig {
            poll_interval_ms: 5,
            max_attempts,
            initial_delay_ms: 0,
            request_timeout_ms: 500,
            ..Default::default()
        }
    }

    /// `dev` (unprotected source), `uat` (unprotected) and `prd` (protected).
    pub fn orchestrator_config() -> OrchestratorConfig {
        let mut environments = BTreeMap::new();
        environments.insert("dev".to_string(), environment(false));
        environments.insert("uat".to_string(), environment(false));
        environments.insert("prd".to_string(), environment(true));

        OrchestratorConfig {
            platform: PlatformConfig::default(),
            environments,
            poller: fast_poller(10),
            layout: repository_layout(),
            gate: GateConfig::default(),
        }
    }
}
