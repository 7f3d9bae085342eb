//! Promotion orchestrator.
//!
//! Sequences session login, export, packaging, publication, the approval
//! gate, fetch and import for one promotion run, and records the outcome.

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::Orchestrator;
pub use types::{
    PromotionRequest, PromotionRun, RunFailure, RunOutcome, Stage, StageError, StageRecord,
    StageStatus,
};
