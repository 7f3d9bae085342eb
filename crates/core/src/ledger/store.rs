use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::PipelineEvent;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A stored pipeline event
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub run_id: Option<String>,
    pub event_type: String,
    pub job_id: Option<String>,
    pub data: PipelineEvent,
}

/// Queryable columns of a stored run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub source_environment: String,
    pub target_environment: String,
    pub version_label: Option<String>,
    pub outcome: String,
    pub failed_stage: Option<String>,
    pub error_kind: Option<String>,
    pub content_hash: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A stored run: summary columns plus the full serialized run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub summary: RunSummary,
    pub data: serde_json::Value,
}

/// Filter for listing runs
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub target_environment: Option<String>,
    pub outcome: Option<String>,
    pub limit: i64,
}

impl RunFilter {
    pub fn new() -> Self {
        Self {
            limit: 20,
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_environment = Some(target.into());
        self
    }

    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

/// Trait for run ledger storage
pub trait LedgerStore: Send + Sync {
    /// Insert an event record, returns the assigned ID
    fn record_event(&self, record: &EventRecord) -> Result<i64, LedgerError>;

    /// Insert or replace a run
    fn save_run(&self, run: &RunRecord) -> Result<(), LedgerError>;

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, LedgerError>;

    /// Most recent runs first
    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunSummary>, LedgerError>;

    /// Events of one run in emission order
    fn events_for_run(&self, run_id: &str) -> Result<Vec<EventRecord>, LedgerError>;
}
