//! Types for platform jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::AssetManifest;
use crate::platform::ImportPackage;

/// Kind of platform job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Export,
    Import,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Export => "export",
            JobKind::Import => "import",
        }
    }
}

/// Local view of a job's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted by the platform, no status seen yet.
    Submitted,
    /// Platform reports the job in progress.
    Running,
    Succeeded,
    Failed,
    /// Attempts exhausted without a terminal remote status.
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }
}

/// Handle to one submitted job.
///
/// Created by `JobPoller::submit` and only ever updated by `JobPoller::poll`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub kind: JobKind,
    pub target_environment: String,
    pub status: JobStatus,
    /// Number of status checks performed so far.
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
    /// Last raw state reported by the platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_state: Option<String>,
    /// Last detail message (remote message or transport error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobHandle {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// What a job is asked to do.
#[derive(Debug, Clone)]
pub enum JobPayload {
    Export(AssetManifest),
    Import(ImportPackage),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Export(_) => JobKind::Export,
            JobPayload::Import(_) => JobKind::Import,
        }
    }
}

/// Errors from `JobPoller::submit`.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The payload cannot be submitted (e.g. empty asset manifest).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The platform could not accept the job.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The platform refused the session.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The session lease ran out before submission.
    #[error("session for environment {0} has expired")]
    SessionExpired(String),
}

impl SubmissionError {
    pub fn kind(&self) -> &'static str {
        match self {
            SubmissionError::InvalidPayload(_) => "SubmissionError::InvalidPayload",
            SubmissionError::ServiceUnavailable(_) => "SubmissionError::ServiceUnavailable",
            SubmissionError::Unauthorized(_) => "SubmissionError::Unauthorized",
            SubmissionError::SessionExpired(_) => "SubmissionError::SessionExpired",
        }
    }
}

/// A wait was aborted through its `CancelToken`.
#[derive(Debug, Clone, Error)]
#[error("{} job {} cancelled after {} attempts", .handle.kind.as_str(), .handle.job_id, .handle.attempts)]
pub struct JobCancelled {
    /// Handle state at the moment of cancellation.
    pub handle: JobHandle,
}
