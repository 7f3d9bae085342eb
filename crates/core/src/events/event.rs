use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobKind, JobStatus};

/// Pipeline event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // Run lifecycle
    RunStarted {
        run_id: String,
        source_environment: String,
        target_environment: String,
        version_label: String,
        /// Hash of the sanitized configuration the run was started with
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config_hash: Option<String>,
    },
    RunFinished {
        run_id: String,
        outcome: String,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failed_stage: Option<String>,
    },
    StageFailed {
        run_id: String,
        stage: String,
        error_kind: String,
        message: String,
    },

    // Sessions
    SessionOpened {
        environment: String,
        api_endpoint: String,
        expires_at: DateTime<Utc>,
    },

    // Jobs
    JobSubmitted {
        job_id: String,
        kind: JobKind,
        environment: String,
    },
    JobPolled {
        job_id: String,
        kind: JobKind,
        attempt: u32,
        /// Raw remote state, absent when the status call failed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote_state: Option<String>,
        status: JobStatus,
    },
    JobFinished {
        job_id: String,
        kind: JobKind,
        status: JobStatus,
        attempts: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    // Artifacts
    ArtifactPackaged {
        content_hash: String,
        size: u64,
        asset_count: usize,
        file_count: usize,
    },
    ArtifactPublished {
        version_label: String,
        content_hash: String,
        url: String,
        /// Same content was already stored under the label
        reused: bool,
    },
    ArtifactFetched {
        version_label: String,
        content_hash: String,
    },

    // Gate
    GateChecked {
        target_environment: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ticket_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        approved: bool,
    },
    GateSkipped {
        target_environment: String,
    },
}

impl PipelineEvent {
    /// Stable event type name (matches the serde tag).
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::RunStarted { .. } => "run_started",
            PipelineEvent::RunFinished { .. } => "run_finished",
            PipelineEvent::StageFailed { .. } => "stage_failed",
            PipelineEvent::SessionOpened { .. } => "session_opened",
            PipelineEvent::JobSubmitted { .. } => "job_submitted",
            PipelineEvent::JobPolled { .. } => "job_polled",
            PipelineEvent::JobFinished { .. } => "job_finished",
            PipelineEvent::ArtifactPackaged { .. } => "artifact_packaged",
            PipelineEvent::ArtifactPublished { .. } => "artifact_published",
            PipelineEvent::ArtifactFetched { .. } => "artifact_fetched",
            PipelineEvent::GateChecked { .. } => "gate_checked",
            PipelineEvent::GateSkipped { .. } => "gate_skipped",
        }
    }

    /// Run id carried by the event itself, if any.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            PipelineEvent::RunStarted { run_id, .. }
            | PipelineEvent::RunFinished { run_id, .. }
            | PipelineEvent::StageFailed { run_id, .. } => Some(run_id),
            _ => None,
        }
    }

    /// Job id, for job events.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            PipelineEvent::JobSubmitted { job_id, .. }
            | PipelineEvent::JobPolled { job_id, .. }
            | PipelineEvent::JobFinished { job_id, .. } => Some(job_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_tagged() {
        let event = PipelineEvent::JobPolled {
            job_id: "j1".to_string(),
            kind: JobKind::Export,
            attempt: 2,
            remote_state: Some("IN_PROGRESS".to_string()),
            status: JobStatus::Running,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_polled");
        assert_eq!(json["kind"], "export");
        assert_eq!(json["status"], "running");
        assert_eq!(json["attempt"], 2);
    }

    #[test]
    fn test_event_type_matches_tag() {
        let events = vec![
            PipelineEvent::GateSkipped {
                target_environment: "uat".to_string(),
            },
            PipelineEvent::StageFailed {
                run_id: "r".to_string(),
                stage: "export".to_string(),
                error_kind: "JobFailed".to_string(),
                message: "boom".to_string(),
            },
            PipelineEvent::ArtifactFetched {
                version_label: "v1".to_string(),
                content_hash: "abc".to_string(),
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn test_round_trip_optional_fields_omitted() {
        let event = PipelineEvent::GateChecked {
            target_environment: "prd".to_string(),
            ticket_id: None,
            status: None,
            approved: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("ticket_id"));

        let parsed: PipelineEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, PipelineEvent::GateChecked { approved: false, .. }));
    }

    #[test]
    fn test_ids() {
        let started = PipelineEvent::RunStarted {
            run_id: "r1".to_string(),
            source_environment: "dev".to_string(),
            target_environment: "uat".to_string(),
            version_label: "v1".to_string(),
            config_hash: None,
        };
        assert_eq!(started.run_id(), Some("r1"));
        assert_eq!(started.job_id(), None);

        let submitted = PipelineEvent::JobSubmitted {
            job_id: "j1".to_string(),
            kind: JobKind::Import,
            environment: "uat".to_string(),
        };
        assert_eq!(submitted.run_id(), None);
        assert_eq!(submitted.job_id(), Some("j1"));
    }
}
