pub mod artifact;
pub mod config;
pub mod events;
pub mod gate;
pub mod job;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod platform;
pub mod session;
pub mod testing;

pub use artifact::{
    Artifact, ArtifactRepository, ArtifactStore, AssetManifest, AssetRef, ExportedFile,
    NexusRepository, RepositoryLayout, StoreError, StoredLocation,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use events::{create_event_pipeline, EventHandle, EventWriter, PipelineEvent};
pub use gate::{
    GateConfig, GateError, JiraClient, PromotionGate, TicketTracker, TriggerContext,
};
pub use job::{CancelToken, JobHandle, JobKind, JobPoller, JobStatus, PollerConfig};
pub use ledger::{LedgerStore, RunFilter, RunSummary, SqliteLedgerStore};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, PromotionRequest, PromotionRun, RunOutcome, Stage,
    StageError,
};
pub use platform::{AssetPlatform, IicsClient, PlatformError};
pub use session::{AuthError, Credentials, Secret, ServiceIdentity, Session, SessionManager};
