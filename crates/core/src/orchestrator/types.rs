//! Types for promotion runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::artifact::{Artifact, AssetManifest, BundleError, StoreError, StoredLocation};
use crate::gate::{GateError, TicketApproval, TriggerContext};
use crate::job::{JobHandle, JobKind, JobStatus, SubmissionError};
use crate::ledger::{RunRecord, RunSummary};
use crate::platform::PlatformError;
use crate::session::{AuthError, Session};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SourceLogin,
    Export,
    Package,
    Publish,
    Approval,
    Fetch,
    TargetLogin,
    Import,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::SourceLogin,
        Stage::Export,
        Stage::Package,
        Stage::Publish,
        Stage::Approval,
        Stage::Fetch,
        Stage::TargetLogin,
        Stage::Import,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::SourceLogin => "source_login",
            Stage::Export => "export",
            Stage::Package => "package",
            Stage::Publish => "publish",
            Stage::Approval => "approval",
            Stage::Fetch => "fetch",
            Stage::TargetLogin => "target_login",
            Stage::Import => "import",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    /// Not required for this run (approval for an unprotected target).
    Skipped,
}

/// What happened in one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Pending,
    Succeeded,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Pending => "pending",
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Failed => "failed",
        }
    }
}

/// Errors that end a run, tagged by the collaborator they came from.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// The remote job ended without success (failed or polling exhausted).
    #[error("{} job {job_id} ended {}{}", .kind.as_str(), .status.as_str(), .message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default())]
    JobFailed {
        job_id: String,
        kind: JobKind,
        status: JobStatus,
        message: Option<String>,
    },

    #[error("export download failed: {0}")]
    Download(PlatformError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    /// The fetched artifact is not the one that was published.
    #[error("fetched artifact {actual} does not match published {expected}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("run cancelled")]
    Cancelled,
}

impl StageError {
    /// Stable diagnostic name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Auth(e) => e.kind(),
            StageError::Submission(e) => e.kind(),
            StageError::JobFailed {
                status: JobStatus::TimedOut,
                ..
            } => "PollTimeout",
            StageError::JobFailed { .. } => "JobFailed",
            StageError::Download(_) => "DownloadError",
            StageError::Bundle(_) => "BundleError",
            StageError::Store(e) => e.kind(),
            StageError::Gate(e) => e.kind(),
            StageError::UnknownEnvironment(_) => "ConfigError::UnknownEnvironment",
            StageError::IntegrityMismatch { .. } => "StoreError::IntegrityMismatch",
            StageError::Cancelled => "Cancelled",
        }
    }
}

/// Serializable description of a run's failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub kind: String,
    pub message: String,
}

/// Input to one orchestrated promotion.
#[derive(Debug, Clone)]
pub struct PromotionRequest {
    pub source_environment: String,
    pub target_environment: String,
    pub trigger: TriggerContext,
    pub manifest: AssetManifest,
    /// Defaults to the trigger's commit SHA, else `local-dev`.
    pub version_label: Option<String>,
}

impl PromotionRequest {
    pub fn new(
        source_environment: impl Into<String>,
        target_environment: impl Into<String>,
        trigger: TriggerContext,
        manifest: AssetManifest,
    ) -> Self {
        Self {
            source_environment: source_environment.into(),
            target_environment: target_environment.into(),
            trigger,
            manifest,
            version_label: None,
        }
    }

    pub fn with_version_label(mut self, label: impl Into<String>) -> Self {
        self.version_label = Some(label.into());
        self
    }

    pub fn resolved_version_label(&self) -> String {
        self.version_label
            .clone()
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| self.trigger.default_version_label())
    }
}

/// One promotion attempt; the record every stage appends to.
#[derive(Debug, Serialize)]
pub struct PromotionRun {
    pub run_id: String,
    pub source_environment: String,
    pub target_environment: String,
    pub version_label: String,
    pub trigger: TriggerContext,
    /// Source environment session (export side).
    pub session: Option<Session>,
    /// Target environment session (import side).
    pub target_session: Option<Session>,
    pub artifact: Option<Artifact>,
    pub location: Option<StoredLocation>,
    /// Export handle first, then import.
    pub job_handles: Vec<JobHandle>,
    /// Only set for protected targets.
    pub approval: Option<TicketApproval>,
    pub stages: Vec<StageRecord>,
    pub outcome: RunOutcome,
    pub failure: Option<RunFailure>,
    #[serde(skip)]
    pub error: Option<StageError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PromotionRun {
    pub fn new(request: &PromotionRequest) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            source_environment: request.source_environment.clone(),
            target_environment: request.target_environment.clone(),
            version_label: request.resolved_version_label(),
            trigger: request.trigger.clone(),
            session: None,
            target_session: None,
            artifact: None,
            location: None,
            job_handles: Vec::new(),
            approval: None,
            stages: Vec::new(),
            outcome: RunOutcome::Pending,
            failure: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.failure.as_ref().map(|f| f.stage)
    }

    pub fn stage_status(&self, stage: Stage) -> Option<StageStatus> {
        self.stages
            .iter()
            .find(|record| record.stage == stage)
            .map(|record| record.status)
    }

    pub fn job(&self, kind: JobKind) -> Option<&JobHandle> {
        self.job_handles.iter().find(|handle| handle.kind == kind)
    }

    /// `stage=<stage> error=<kind>: <message>` for failed runs.
    pub fn diagnostic(&self) -> Option<String> {
        self.failure.as_ref().map(|f| {
            format!("stage={} error={}: {}", f.stage.as_str(), f.kind, f.message)
        })
    }

    pub fn record_stage(&mut self, stage: Stage, status: StageStatus, started_at: DateTime<Utc>) {
        self.stages.push(StageRecord {
            stage,
            status,
            started_at,
            finished_at: Utc::now(),
        });
    }

    /// Freeze the run as failed at `stage`.
    pub fn fail(&mut self, stage: Stage, started_at: DateTime<Utc>, error: StageError) {
        self.record_stage(stage, StageStatus::Failed, started_at);
        self.failure = Some(RunFailure {
            stage,
            kind: error.kind().to_string(),
            message: error.to_string(),
        });
        self.error = Some(error);
        self.outcome = RunOutcome::Failed;
        self.finished_at = Some(Utc::now());
    }

    /// Mark the run succeeded if every stage it required succeeded.
    pub fn complete(&mut self, approval_required: bool) {
        let all_ok = Stage::ALL.iter().all(|stage| {
            match (self.stage_status(*stage), stage) {
                (Some(StageStatus::Succeeded), _) => true,
                (Some(StageStatus::Skipped), Stage::Approval) => !approval_required,
                _ => false,
            }
        });
        self.outcome = if all_ok && self.failure.is_none() {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed
        };
        self.finished_at = Some(Utc::now());
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            source_environment: self.source_environment.clone(),
            target_environment: self.target_environment.clone(),
            version_label: Some(self.version_label.clone()),
            outcome: self.outcome.as_str().to_string(),
            failed_stage: self.failed_stage().map(|s| s.as_str().to_string()),
            error_kind: self.failure.as_ref().map(|f| f.kind.clone()),
            content_hash: self.artifact.as_ref().map(|a| a.content_hash.clone()),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    pub fn to_record(&self) -> Result<RunRecord, serde_json::Error> {
        Ok(RunRecord {
            summary: self.summary(),
            data: serde_json::to_value(self)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn request() -> PromotionRequest {
        PromotionRequest::new("dev", "uat", fixtures::trigger("OPS-1"), fixtures::asset_manifest(1))
    }

    #[test]
    fn test_version_label_resolution() {
        assert_eq!(request().resolved_version_label(), "a1b2c3d");
        assert_eq!(
            request().with_version_label("1.4.0").resolved_version_label(),
            "1.4.0"
        );

        let bare = PromotionRequest::new(
            "dev",
            "uat",
            TriggerContext::new(),
            fixtures::asset_manifest(1),
        );
        assert_eq!(bare.resolved_version_label(), "local-dev");
    }

    #[test]
    fn test_fail_freezes_run() {
        let mut run = PromotionRun::new(&request());
        run.fail(
            Stage::Approval,
            Utc::now(),
            StageError::Gate(GateError::NotApproved {
                ticket_id: "OPS-1".to_string(),
                actual_status: "In Review".to_string(),
            }),
        );

        assert_eq!(run.outcome, RunOutcome::Failed);
        assert_eq!(run.failed_stage(), Some(Stage::Approval));
        assert_eq!(
            run.diagnostic().unwrap(),
            "stage=approval error=GateError::NotApproved: ticket OPS-1 is not approved (status: In Review)"
        );
    }

    #[test]
    fn test_complete_requires_every_stage() {
        let mut run = PromotionRun::new(&request());
        for stage in Stage::ALL {
            if stage == Stage::Approval {
                run.record_stage(stage, StageStatus::Skipped, Utc::now());
            } else {
                run.record_stage(stage, StageStatus::Succeeded, Utc::now());
            }
        }
        run.complete(false);
        assert_eq!(run.outcome, RunOutcome::Succeeded);

        // A skipped approval is not enough for a protected target.
        run.complete(true);
        assert_eq!(run.outcome, RunOutcome::Failed);
    }

    #[test]
    fn test_complete_with_missing_stage_fails() {
        let mut run = PromotionRun::new(&request());
        run.record_stage(Stage::SourceLogin, StageStatus::Succeeded, Utc::now());
        run.complete(false);
        assert_eq!(run.outcome, RunOutcome::Failed);
    }

    #[test]
    fn test_error_kinds() {
        let timed_out = StageError::JobFailed {
            job_id: "j".to_string(),
            kind: JobKind::Export,
            status: JobStatus::TimedOut,
            message: None,
        };
        assert_eq!(timed_out.kind(), "PollTimeout");
        assert_eq!(timed_out.to_string(), "export job j ended timed_out");

        let failed = StageError::JobFailed {
            job_id: "j".to_string(),
            kind: JobKind::Import,
            status: JobStatus::Failed,
            message: Some("object locked".to_string()),
        };
        assert_eq!(failed.kind(), "JobFailed");
        assert_eq!(failed.to_string(), "import job j ended failed: object locked");

        let auth = StageError::from(AuthError::Rejected("HTTP 401".to_string()));
        assert_eq!(auth.kind(), "AuthError::Rejected");
    }

    #[test]
    fn test_serialized_run_has_no_token() {
        let mut run = PromotionRun::new(&request());
        run.session = Some(fixtures::session("dev"));
        let json = serde_json::to_string(&run).unwrap();
        assert!(!json.contains("fixture-token"));
        assert!(json.contains("\"outcome\":\"pending\""));
    }
}
