//! Promotion run sequencing.
//!
//! One run is strictly sequential: source login, export, package, publish,
//! approval (protected targets only), fetch, target login, import. The first
//! failing stage freezes the run; nothing after it is invoked.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::artifact::{ArtifactRepository, ArtifactStore};
use crate::config::EnvironmentConfig;
use crate::events::{EventHandle, PipelineEvent};
use crate::gate::{PromotionGate, TicketTracker};
use crate::job::{CancelToken, JobHandle, JobKind, JobPayload, JobPoller, JobStatus};
use crate::ledger::LedgerStore;
use crate::metrics;
use crate::platform::{AssetPlatform, ImportPackage};
use crate::session::{Session, SessionManager};

use super::config::OrchestratorConfig;
use super::types::{PromotionRequest, PromotionRun, Stage, StageError, StageStatus};

/// A failed stage, carried out of `execute`.
struct StageFailure {
    stage: Stage,
    started_at: DateTime<Utc>,
    error: StageError,
}

/// A stage in progress.
struct StageClock {
    stage: Stage,
    started_at: DateTime<Utc>,
}

impl StageClock {
    fn fail(&self, error: impl Into<StageError>) -> StageFailure {
        StageFailure {
            stage: self.stage,
            started_at: self.started_at,
            error: error.into(),
        }
    }
}

/// Per-run collaborators, all emitting through the run's event handle.
struct RunComponents {
    sessions: SessionManager,
    poller: JobPoller,
    store: ArtifactStore,
    events: Option<EventHandle>,
}

/// Drives promotion runs against the three external collaborators.
pub struct Orchestrator {
    config: OrchestratorConfig,
    platform: Arc<dyn AssetPlatform>,
    repository: Arc<dyn ArtifactRepository>,
    tracker: Arc<dyn TicketTracker>,
    events: Option<EventHandle>,
    ledger: Option<Arc<dyn LedgerStore>>,
    config_hash: Option<String>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        platform: Arc<dyn AssetPlatform>,
        repository: Arc<dyn ArtifactRepository>,
        tracker: Arc<dyn TicketTracker>,
    ) -> Self {
        Self {
            config,
            platform,
            repository,
            tracker,
            events: None,
            ledger: None,
            config_hash: None,
        }
    }

    pub fn with_events(mut self, events: EventHandle) -> Self {
        self.events = Some(events);
        self
    }

    /// Persist every finished run to `ledger`.
    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerStore>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Hash of the effective configuration, recorded in `run_started`.
    pub fn with_config_hash(mut self, config_hash: impl Into<String>) -> Self {
        self.config_hash = Some(config_hash.into());
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Execute one promotion run to completion.
    ///
    /// Always returns the run; failures are recorded on it with the stage
    /// they happened in. A failed run is never retried here.
    pub async fn run(&self, request: PromotionRequest, cancel: &CancelToken) -> PromotionRun {
        let mut run = PromotionRun::new(&request);
        let timer = Instant::now();
        let components = self.components(&run.run_id);

        info!(
            run_id = %run.run_id,
            source_environment = %run.source_environment,
            target_environment = %run.target_environment,
            version_label = %run.version_label,
            assets = request.manifest.assets.len(),
            "Promotion run started"
        );
        emit(
            &components.events,
            PipelineEvent::RunStarted {
                run_id: run.run_id.clone(),
                source_environment: run.source_environment.clone(),
                target_environment: run.target_environment.clone(),
                version_label: run.version_label.clone(),
                config_hash: self.config_hash.clone(),
            },
        )
        .await;

        match self.execute(&mut run, &request, &components, cancel).await {
            Ok(approval_required) => run.complete(approval_required),
            Err(failure) => {
                error!(
                    run_id = %run.run_id,
                    stage = failure.stage.as_str(),
                    error_kind = failure.error.kind(),
                    error = %failure.error,
                    "Promotion stage failed"
                );
                metrics::STAGE_FAILURES
                    .with_label_values(&[failure.stage.as_str()])
                    .inc();
                emit(
                    &components.events,
                    PipelineEvent::StageFailed {
                        run_id: run.run_id.clone(),
                        stage: failure.stage.as_str().to_string(),
                        error_kind: failure.error.kind().to_string(),
                        message: failure.error.to_string(),
                    },
                )
                .await;
                run.fail(failure.stage, failure.started_at, failure.error);
            }
        }

        let elapsed = timer.elapsed();
        let outcome = run.outcome.as_str();
        metrics::RUNS_TOTAL.with_label_values(&[outcome]).inc();
        metrics::RUN_DURATION
            .with_label_values(&[outcome])
            .observe(elapsed.as_secs_f64());

        info!(
            run_id = %run.run_id,
            outcome,
            duration_ms = elapsed.as_millis() as u64,
            "Promotion run finished"
        );
        emit(
            &components.events,
            PipelineEvent::RunFinished {
                run_id: run.run_id.clone(),
                outcome: outcome.to_string(),
                duration_ms: elapsed.as_millis() as u64,
                failed_stage: run.failed_stage().map(|s| s.as_str().to_string()),
            },
        )
        .await;

        self.persist(&run);
        run
    }

    fn components(&self, run_id: &str) -> RunComponents {
        let events = self.events.as_ref().map(|e| e.for_run(run_id));

        let mut sessions =
            SessionManager::new(self.platform.clone(), self.config.platform.session_lease());
        let mut poller = JobPoller::new(self.platform.clone(), self.config.poller.clone());
        let mut store = ArtifactStore::new(self.repository.clone(), self.config.layout.clone());
        if let Some(events) = &events {
            sessions = sessions.with_events(events.clone());
            poller = poller.with_events(events.clone());
            store = store.with_events(events.clone());
        }

        RunComponents {
            sessions,
            poller,
            store,
            events,
        }
    }

    fn persist(&self, run: &PromotionRun) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        let saved = run
            .to_record()
            .map_err(|e| e.to_string())
            .and_then(|record| ledger.save_run(&record).map_err(|e| e.to_string()));
        if let Err(e) = saved {
            warn!(run_id = %run.run_id, error = %e, "Failed to save run to ledger");
        }
    }

    fn begin(&self, stage: Stage, cancel: &CancelToken) -> Result<StageClock, StageFailure> {
        let clock = StageClock {
            stage,
            started_at: Utc::now(),
        };
        if cancel.is_cancelled() {
            return Err(clock.fail(StageError::Cancelled));
        }
        info!(stage = stage.as_str(), "Stage started");
        Ok(clock)
    }

    fn resolve(&self, name: &str, stage: Stage) -> Result<&EnvironmentConfig, StageFailure> {
        self.config.environment(name).ok_or_else(|| StageFailure {
            stage,
            started_at: Utc::now(),
            error: StageError::UnknownEnvironment(name.to_string()),
        })
    }

    /// Run every stage. Returns whether approval was required.
    async fn execute(
        &self,
        run: &mut PromotionRun,
        request: &PromotionRequest,
        components: &RunComponents,
        cancel: &CancelToken,
    ) -> Result<bool, StageFailure> {
        let source = self.resolve(&request.source_environment, Stage::SourceLogin)?;
        let target = self.resolve(&request.target_environment, Stage::TargetLogin)?;
        let label = run.version_label.clone();

        // Source login
        let clock = self.begin(Stage::SourceLogin, cancel)?;
        let identity = source.identity(&request.source_environment, &self.config.platform);
        let session = guarded(
            cancel,
            components
                .sessions
                .authenticate(&source.credentials(), &identity),
        )
        .await
        .map_err(|e| clock.fail(e))?;
        run.session = Some(session.clone());
        run.record_stage(clock.stage, StageStatus::Succeeded, clock.started_at);

        // Export
        let clock = self.begin(Stage::Export, cancel)?;
        let payload = JobPayload::Export(request.manifest.clone());
        let export = self
            .run_job(run, components, &session, JobKind::Export, &payload, cancel)
            .await
            .map_err(|e| clock.fail(e))?;
        run.record_stage(clock.stage, StageStatus::Succeeded, clock.started_at);

        // Package
        let clock = self.begin(Stage::Package, cancel)?;
        let files = guarded(cancel, async {
            self.platform
                .download_export(&session, &export.job_id)
                .await
                .map_err(StageError::Download)
        })
        .await
        .map_err(|e| clock.fail(e))?;
        let artifact = components
            .store
            .package(&request.manifest, &files)
            .map_err(|e| clock.fail(e))?
            .labelled(label.clone());
        run.artifact = Some(artifact.clone());
        run.record_stage(clock.stage, StageStatus::Succeeded, clock.started_at);

        // Publish
        let clock = self.begin(Stage::Publish, cancel)?;
        let location = guarded(cancel, components.store.publish(&artifact, &label))
            .await
            .map_err(|e| clock.fail(e))?;
        run.location = Some(location);
        run.record_stage(clock.stage, StageStatus::Succeeded, clock.started_at);

        // Approval
        let clock = self.begin(Stage::Approval, cancel)?;
        if target.protected {
            let mut gate = PromotionGate::new(self.tracker.clone(), &self.config.gate)
                .map_err(|e| clock.fail(e))?;
            if let Some(events) = &components.events {
                gate = gate.with_events(events.clone());
            }
            let approval = guarded(
                cancel,
                gate.authorize(&request.trigger, &request.target_environment),
            )
            .await
            .map_err(|e| clock.fail(e))?;
            run.approval = Some(approval);
            run.record_stage(clock.stage, StageStatus::Succeeded, clock.started_at);
        } else {
            info!(target_environment = %request.target_environment, "Target is unprotected, approval gate skipped");
            emit(
                &components.events,
                PipelineEvent::GateSkipped {
                    target_environment: request.target_environment.clone(),
                },
            )
            .await;
            run.record_stage(clock.stage, StageStatus::Skipped, clock.started_at);
        }

        // Fetch
        let clock = self.begin(Stage::Fetch, cancel)?;
        let fetched = guarded(cancel, components.store.fetch(&label))
            .await
            .map_err(|e| clock.fail(e))?;
        if fetched.content_hash != artifact.content_hash {
            return Err(clock.fail(StageError::IntegrityMismatch {
                expected: artifact.content_hash.clone(),
                actual: fetched.content_hash.clone(),
            }));
        }
        run.record_stage(clock.stage, StageStatus::Succeeded, clock.started_at);

        // Target login
        let clock = self.begin(Stage::TargetLogin, cancel)?;
        let identity = target.identity(&request.target_environment, &self.config.platform);
        let target_session = guarded(
            cancel,
            components
                .sessions
                .authenticate(&target.credentials(), &identity),
        )
        .await
        .map_err(|e| clock.fail(e))?;
        run.target_session = Some(target_session.clone());
        run.record_stage(clock.stage, StageStatus::Succeeded, clock.started_at);

        // Import
        let clock = self.begin(Stage::Import, cancel)?;
        let payload = JobPayload::Import(ImportPackage {
            content_hash: fetched.content_hash.clone(),
            version_label: label,
            files: fetched.files().to_vec(),
        });
        self.run_job(run, components, &target_session, JobKind::Import, &payload, cancel)
            .await
            .map_err(|e| clock.fail(e))?;
        run.record_stage(clock.stage, StageStatus::Succeeded, clock.started_at);

        Ok(target.protected)
    }

    /// Submit one job and wait for it. The handle on the run is kept current.
    async fn run_job(
        &self,
        run: &mut PromotionRun,
        components: &RunComponents,
        session: &Session,
        kind: JobKind,
        payload: &JobPayload,
        cancel: &CancelToken,
    ) -> Result<JobHandle, StageError> {
        let handle = guarded(cancel, components.poller.submit(session, kind, payload)).await?;
        run.job_handles.push(handle.clone());
        let index = run.job_handles.len() - 1;

        let handle = match components.poller.wait(session, handle, cancel).await {
            Ok(handle) => handle,
            Err(cancelled) => {
                run.job_handles[index] = cancelled.handle;
                return Err(StageError::Cancelled);
            }
        };
        run.job_handles[index] = handle.clone();

        if handle.status != JobStatus::Succeeded {
            return Err(StageError::JobFailed {
                job_id: handle.job_id.clone(),
                kind,
                status: handle.status,
                message: handle.message.clone(),
            });
        }
        Ok(handle)
    }
}

/// Race a stage call against cancellation.
async fn guarded<T, E, F>(cancel: &CancelToken, fut: F) -> Result<T, StageError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<StageError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StageError::Cancelled),
        result = fut => result.map_err(Into::into),
    }
}

async fn emit(events: &Option<EventHandle>, event: PipelineEvent) {
    if let Some(events) = events {
        events.emit(event).await;
    }
}
