//! Job poller implementation.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::events::{EventHandle, PipelineEvent};
use crate::metrics;
use crate::platform::{AssetPlatform, PlatformError};
use crate::session::Session;

use super::{
    CancelToken, JobCancelled, JobHandle, JobKind, JobPayload, JobStatus, PollerConfig,
    RemoteState, SubmissionError,
};

/// Submits platform jobs and tracks them to a terminal status.
pub struct JobPoller {
    platform: Arc<dyn AssetPlatform>,
    config: PollerConfig,
    events: Option<EventHandle>,
}

impl JobPoller {
    /// Create a new poller.
    pub fn new(platform: Arc<dyn AssetPlatform>, config: PollerConfig) -> Self {
        Self {
            platform,
            config,
            events: None,
        }
    }

    /// Emit job events through the given handle.
    pub fn with_events(mut self, events: EventHandle) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Submit a job. This is the only place a remote job is created.
    ///
    /// Submission is never retried: a transport error here surfaces as
    /// `ServiceUnavailable` since a retry could create a duplicate job.
    pub async fn submit(
        &self,
        session: &Session,
        kind: JobKind,
        payload: &JobPayload,
    ) -> Result<JobHandle, SubmissionError> {
        if payload.kind() != kind {
            return Err(SubmissionError::InvalidPayload(format!(
                "{} payload submitted as {} job",
                payload.kind().as_str(),
                kind.as_str()
            )));
        }

        match payload {
            JobPayload::Export(manifest) if manifest.assets.is_empty() => {
                return Err(SubmissionError::InvalidPayload(
                    "asset manifest lists no assets".to_string(),
                ));
            }
            JobPayload::Import(package) if package.package_file().is_none() => {
                return Err(SubmissionError::InvalidPayload(format!(
                    "artifact {} does not contain exactly one platform package",
                    package.content_hash
                )));
            }
            _ => {}
        }

        if session.is_expired() {
            return Err(SubmissionError::SessionExpired(session.environment.clone()));
        }

        let result = match payload {
            JobPayload::Export(manifest) => self.platform.submit_export(session, manifest).await,
            JobPayload::Import(package) => self.platform.submit_import(session, package).await,
        };
        metrics::record_external_call(
            self.platform.name(),
            &format!("submit_{}", kind.as_str()),
            result.is_ok(),
        );

        let job_id = result.map_err(|e| match e {
            PlatformError::InvalidRequest(msg) => SubmissionError::InvalidPayload(msg),
            PlatformError::Rejected(msg) => SubmissionError::Unauthorized(msg),
            other => SubmissionError::ServiceUnavailable(other.to_string()),
        })?;

        let handle = JobHandle {
            job_id,
            kind,
            target_environment: session.environment.clone(),
            status: JobStatus::Submitted,
            attempts: 0,
            submitted_at: Utc::now(),
            remote_state: None,
            message: None,
            finished_at: None,
        };

        info!(
            job_id = %handle.job_id,
            kind = kind.as_str(),
            environment = %handle.target_environment,
            "Job submitted"
        );
        self.emit(PipelineEvent::JobSubmitted {
            job_id: handle.job_id.clone(),
            kind,
            environment: handle.target_environment.clone(),
        })
        .await;

        Ok(handle)
    }

    /// Perform one status check and return the updated handle.
    ///
    /// Terminal handles are returned unchanged without contacting the platform.
    /// Errors while checking are transient: they are recorded on the handle and
    /// count as an attempt, and the handle becomes `TimedOut` once
    /// `max_attempts` checks have been made without a terminal remote state.
    pub async fn poll(&self, session: &Session, mut handle: JobHandle) -> JobHandle {
        if handle.is_terminal() {
            debug!(job_id = %handle.job_id, status = handle.status.as_str(), "Poll on terminal job ignored");
            return handle;
        }

        handle.attempts += 1;
        let kind = handle.kind;

        let checked = tokio::time::timeout(
            self.config.request_timeout(),
            self.platform.job_status(session, kind, &handle.job_id),
        )
        .await;

        match checked {
            Ok(Ok(remote)) => {
                metrics::JOB_POLLS.with_label_values(&[kind.as_str(), "ok"]).inc();
                handle.status = match self.config.status_mapping.classify(&remote.state) {
                    RemoteState::Running => JobStatus::Running,
                    RemoteState::Succeeded => JobStatus::Succeeded,
                    RemoteState::Failed => JobStatus::Failed,
                };
                handle.remote_state = Some(remote.state);
                handle.message = remote.message;
            }
            Ok(Err(e)) => {
                metrics::JOB_POLLS
                    .with_label_values(&[kind.as_str(), "transient_error"])
                    .inc();
                warn!(
                    job_id = %handle.job_id,
                    attempt = handle.attempts,
                    error = %e,
                    "Transient error while polling job"
                );
                handle.message = Some(e.to_string());
            }
            Err(_) => {
                metrics::JOB_POLLS
                    .with_label_values(&[kind.as_str(), "transient_error"])
                    .inc();
                warn!(
                    job_id = %handle.job_id,
                    attempt = handle.attempts,
                    "Job status request timed out"
                );
                handle.message = Some("status request timed out".to_string());
            }
        }

        if !handle.is_terminal() && handle.attempts >= self.config.max_attempts {
            handle.status = JobStatus::TimedOut;
        }

        debug!(
            job_id = %handle.job_id,
            attempt = handle.attempts,
            status = handle.status.as_str(),
            remote_state = ?handle.remote_state,
            "Job polled"
        );
        self.emit(PipelineEvent::JobPolled {
            job_id: handle.job_id.clone(),
            kind,
            attempt: handle.attempts,
            remote_state: handle.remote_state.clone(),
            status: handle.status,
        })
        .await;

        if handle.is_terminal() {
            let finished_at = Utc::now();
            handle.finished_at = Some(finished_at);
            let elapsed = (finished_at - handle.submitted_at).num_milliseconds().max(0) as f64 / 1000.0;
            metrics::JOB_DURATION
                .with_label_values(&[kind.as_str(), handle.status.as_str()])
                .observe(elapsed);

            info!(
                job_id = %handle.job_id,
                kind = kind.as_str(),
                status = handle.status.as_str(),
                attempts = handle.attempts,
                "Job reached terminal status"
            );
            self.emit(PipelineEvent::JobFinished {
                job_id: handle.job_id.clone(),
                kind,
                status: handle.status,
                attempts: handle.attempts,
                message: handle.message.clone(),
            })
            .await;
        }

        handle
    }

    /// Poll until the job is terminal or the token is cancelled.
    ///
    /// Waits `initial_delay` before the first check and `poll_interval`
    /// between checks. Cancellation interrupts both the waits and an in-flight
    /// status call.
    pub async fn wait(
        &self,
        session: &Session,
        mut handle: JobHandle,
        cancel: &CancelToken,
    ) -> Result<JobHandle, JobCancelled> {
        if handle.is_terminal() {
            return Ok(handle);
        }

        let initial_delay = self.config.initial_delay();
        if !initial_delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(handle)),
                _ = tokio::time::sleep(initial_delay) => {}
            }
        }

        loop {
            let current = handle.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(handle)),
                polled = self.poll(session, current) => handle = polled,
            }

            if handle.is_terminal() {
                return Ok(handle);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(handle)),
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
    }

    fn cancelled(&self, handle: JobHandle) -> JobCancelled {
        warn!(
            job_id = %handle.job_id,
            kind = handle.kind.as_str(),
            attempts = handle.attempts,
            "Job wait cancelled"
        );
        JobCancelled { handle }
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.emit(event).await;
        }
    }
}
