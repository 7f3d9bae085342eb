//! Promotion lifecycle integration tests.
//!
//! These tests drive complete runs through the orchestrator against mock
//! collaborators:
//! source login -> export -> package -> publish -> approval -> fetch -> target login -> import

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use promotion_core::{
    artifact::ExportedFile,
    create_event_pipeline,
    gate::GateError,
    ledger::{LedgerStore, RunFilter},
    session::AuthError,
    testing::{fixtures, MockPlatform, MockRepository, MockTracker, StatusStep},
    CancelToken, JobKind, JobStatus, Orchestrator, OrchestratorConfig, PromotionRequest,
    RunOutcome, SqliteLedgerStore, Stage, StageError,
};

/// Test helper holding the mocks behind one orchestrator.
struct TestHarness {
    platform: Arc<MockPlatform>,
    repository: Arc<MockRepository>,
    tracker: Arc<MockTracker>,
    config: OrchestratorConfig,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(fixtures::orchestrator_config())
    }

    fn with_config(config: OrchestratorConfig) -> Self {
        Self {
            platform: Arc::new(MockPlatform::new()),
            repository: Arc::new(MockRepository::new()),
            tracker: Arc::new(MockTracker::new()),
            config,
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.config.clone(),
            self.platform.clone(),
            self.repository.clone(),
            self.tracker.clone(),
        )
    }
}

fn request(target: &str, asset_count: usize) -> PromotionRequest {
    PromotionRequest::new(
        "dev",
        target,
        fixtures::trigger("OPS-42"),
        fixtures::asset_manifest(asset_count),
    )
}

// =============================================================================
// Happy paths
// =============================================================================

#[tokio::test]
async fn test_export_publish_import_with_supplied_label() {
    let harness = TestHarness::new();
    harness
        .platform
        .set_status_script(
            JobKind::Export,
            vec![
                StatusStep::state("IN_PROGRESS"),
                StatusStep::state("IN_PROGRESS"),
                StatusStep::state("SUCCESSFUL"),
            ],
        )
        .await;

    let run = harness
        .orchestrator()
        .run(
            request("uat", 2).with_version_label("release-1.4.0"),
            &CancelToken::new(),
        )
        .await;

    assert_eq!(run.outcome, RunOutcome::Succeeded, "{:?}", run.diagnostic());
    assert_eq!(run.version_label, "release-1.4.0");

    let export = run.job(JobKind::Export).expect("export handle");
    assert_eq!(export.status, JobStatus::Succeeded);
    assert_eq!(export.attempts, 3);
    assert_eq!(harness.platform.status_calls_for(&export.job_id).await, 3);

    let artifact = run.artifact.as_ref().expect("artifact");
    assert_eq!(artifact.content_hash.len(), 64);
    assert_eq!(artifact.source_asset_manifest.assets.len(), 2);

    let location = run.location.as_ref().expect("location");
    assert_eq!(location.coordinates.version_label, "release-1.4.0");
    assert_eq!(location.content_hash, artifact.content_hash);
    assert!(!location.reused);

    // The imported package carries the published hash
    let submissions = harness.platform.submissions().await;
    let import = submissions
        .iter()
        .find(|s| s.kind == JobKind::Import)
        .expect("import submission");
    assert_eq!(import.environment, "uat");
    assert_eq!(import.content_hash.as_deref(), Some(artifact.content_hash.as_str()));
}

#[tokio::test]
async fn test_content_hash_is_deterministic_across_runs() {
    let first = TestHarness::new();
    let second = TestHarness::new();

    let a = first
        .orchestrator()
        .run(request("uat", 2), &CancelToken::new())
        .await;
    let b = second
        .orchestrator()
        .run(request("uat", 2), &CancelToken::new())
        .await;

    assert!(a.is_succeeded() && b.is_succeeded());
    assert_ne!(a.run_id, b.run_id);
    assert_eq!(
        a.artifact.as_ref().map(|x| &x.content_hash),
        b.artifact.as_ref().map(|x| &x.content_hash)
    );
}

#[tokio::test]
async fn test_protected_target_with_approved_ticket() {
    let harness = TestHarness::new();
    harness.tracker.set_status("OPS-42", "Approved").await;

    let run = harness
        .orchestrator()
        .run(request("prd", 1), &CancelToken::new())
        .await;

    assert!(run.is_succeeded(), "{:?}", run.diagnostic());
    let approval = run.approval.as_ref().expect("approval recorded");
    assert_eq!(approval.ticket_id, "OPS-42");
    assert_eq!(approval.status, "Approved");
    assert_eq!(harness.tracker.lookups().await, vec!["OPS-42"]);
    assert_eq!(harness.platform.logins().await, vec!["dev", "prd"]);
}

#[tokio::test]
async fn test_unprotected_target_skips_gate() {
    let harness = TestHarness::new();

    let run = harness
        .orchestrator()
        .run(request("uat", 1), &CancelToken::new())
        .await;

    assert!(run.is_succeeded());
    assert!(run.approval.is_none());
    assert_eq!(harness.tracker.call_count().await, 0);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_unapproved_ticket_blocks_import() {
    let harness = TestHarness::new();
    harness.tracker.set_status("OPS-42", "In Review").await;

    let run = harness
        .orchestrator()
        .run(request("prd", 2), &CancelToken::new())
        .await;

    assert_eq!(run.outcome, RunOutcome::Failed);
    assert_eq!(run.failed_stage(), Some(Stage::Approval));
    match &run.error {
        Some(StageError::Gate(GateError::NotApproved {
            ticket_id,
            actual_status,
        })) => {
            assert_eq!(ticket_id, "OPS-42");
            assert_eq!(actual_status, "In Review");
        }
        other => panic!("expected NotApproved, got {:?}", other),
    }

    // Import never started and the target was never logged into
    assert_eq!(harness.platform.submit_count(JobKind::Import).await, 0);
    assert_eq!(harness.platform.logins().await, vec!["dev"]);
    assert_eq!(run.job_handles.len(), 1);
}

#[tokio::test]
async fn test_export_that_never_finishes_times_out() {
    let mut config = fixtures::orchestrator_config();
    config.poller = fixtures::fast_poller(5);
    let harness = TestHarness::with_config(config);
    harness
        .platform
        .set_status_script(JobKind::Export, vec![StatusStep::state("IN_PROGRESS")])
        .await;

    let run = harness
        .orchestrator()
        .run(request("uat", 2), &CancelToken::new())
        .await;

    assert_eq!(run.outcome, RunOutcome::Failed);
    assert_eq!(run.failed_stage(), Some(Stage::Export));
    assert_eq!(run.failure.as_ref().unwrap().kind, "PollTimeout");

    let export = run.job(JobKind::Export).expect("export handle");
    assert_eq!(export.status, JobStatus::TimedOut);
    assert_eq!(export.attempts, 5);

    // No artifact published
    assert!(run.artifact.is_none());
    assert_eq!(harness.repository.file_count().await, 0);
    assert_eq!(harness.platform.download_count().await, 0);
}

#[tokio::test]
async fn test_failed_remote_job_reports_message() {
    let harness = TestHarness::new();
    harness
        .platform
        .set_status_script(
            JobKind::Import,
            vec![StatusStep::state_with_message(
                "WARNING",
                "2 of 3 objects imported",
            )],
        )
        .await;

    let run = harness
        .orchestrator()
        .run(request("uat", 3), &CancelToken::new())
        .await;

    assert_eq!(run.failed_stage(), Some(Stage::Import));
    assert_eq!(run.failure.as_ref().unwrap().kind, "JobFailed");
    assert!(run
        .diagnostic()
        .unwrap()
        .contains("2 of 3 objects imported"));
    // The artifact stays published
    assert!(run.location.is_some());
}

#[tokio::test]
async fn test_missing_credentials_fail_before_network() {
    let mut config = fixtures::orchestrator_config();
    if let Some(dev) = config.environments.get_mut("dev") {
        dev.password = None;
    }
    let harness = TestHarness::with_config(config);

    let run = harness
        .orchestrator()
        .run(request("uat", 2), &CancelToken::new())
        .await;

    assert_eq!(run.failed_stage(), Some(Stage::SourceLogin));
    assert!(matches!(
        run.error,
        Some(StageError::Auth(AuthError::MissingCredentials { .. }))
    ));
    assert_eq!(
        run.failure.as_ref().unwrap().kind,
        "AuthError::MissingCredentials"
    );
    assert!(harness.platform.call_log().await.is_empty());
    assert!(harness.repository.call_log().await.is_empty());
}

#[tokio::test]
async fn test_failure_diagnostic_never_contains_secrets() {
    let harness = TestHarness::new();
    harness
        .platform
        .set_login_error(promotion_core::PlatformError::Rejected("HTTP 401".to_string()))
        .await;

    let run = harness
        .orchestrator()
        .run(request("uat", 1), &CancelToken::new())
        .await;

    let diagnostic = run.diagnostic().expect("failed run has a diagnostic");
    assert!(diagnostic.starts_with("stage=source_login"));
    assert!(!diagnostic.contains("svc-password"));

    let serialized = serde_json::to_string(&run).unwrap();
    assert!(!serialized.contains("svc-password"));
}

// =============================================================================
// Idempotency and exactly-once behavior
// =============================================================================

#[tokio::test]
async fn test_republishing_same_label_is_idempotent() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();

    let first = orchestrator
        .run(request("uat", 2), &CancelToken::new())
        .await;
    let puts_after_first = harness.repository.put_count().await;
    let second = orchestrator
        .run(request("uat", 2), &CancelToken::new())
        .await;

    assert!(first.is_succeeded() && second.is_succeeded());
    assert!(!first.location.as_ref().unwrap().reused);
    assert!(second.location.as_ref().unwrap().reused);
    assert_eq!(harness.repository.put_count().await, puts_after_first);
    assert_eq!(harness.repository.file_count().await, 2);
}

#[tokio::test]
async fn test_different_content_under_same_label_conflicts() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();

    let first = orchestrator
        .run(request("uat", 2), &CancelToken::new())
        .await;
    assert!(first.is_succeeded());

    harness
        .platform
        .set_export_files(vec![ExportedFile::new(
            "export_package.zip",
            b"PK\x03\x04changed-export".to_vec(),
        )])
        .await;
    let second = orchestrator
        .run(request("uat", 2), &CancelToken::new())
        .await;

    assert_eq!(second.failed_stage(), Some(Stage::Publish));
    assert_eq!(second.failure.as_ref().unwrap().kind, "StoreError::Conflict");
    // Only the first run imported
    assert_eq!(harness.platform.submit_count(JobKind::Import).await, 1);
}

#[tokio::test]
async fn test_jobs_are_submitted_exactly_once_despite_poll_errors() {
    let harness = TestHarness::new();
    harness
        .platform
        .set_status_script(
            JobKind::Export,
            vec![
                StatusStep::transport_error(),
                StatusStep::state("IN_PROGRESS"),
                StatusStep::transport_error(),
                StatusStep::state("SUCCESSFUL"),
            ],
        )
        .await;

    let run = harness
        .orchestrator()
        .run(request("uat", 2), &CancelToken::new())
        .await;

    assert!(run.is_succeeded(), "{:?}", run.diagnostic());
    assert_eq!(harness.platform.submit_count(JobKind::Export).await, 1);
    assert_eq!(harness.platform.submit_count(JobKind::Import).await, 1);
    assert_eq!(run.job(JobKind::Export).unwrap().attempts, 4);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancellation_during_polling_stops_run() {
    let mut config = fixtures::orchestrator_config();
    config.poller = fixtures::fast_poller(10_000);
    let harness = TestHarness::with_config(config);
    harness
        .platform
        .set_status_script(JobKind::Export, vec![StatusStep::state("IN_PROGRESS")])
        .await;

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let run = tokio::time::timeout(
        Duration::from_secs(5),
        harness.orchestrator().run(request("uat", 2), &cancel),
    )
    .await
    .expect("run should stop promptly after cancellation");

    assert_eq!(run.failed_stage(), Some(Stage::Export));
    assert_eq!(run.failure.as_ref().unwrap().kind, "Cancelled");
    let export = run.job(JobKind::Export).expect("export handle");
    assert!(!export.is_terminal());
    assert!(export.attempts > 0);
    assert_eq!(harness.repository.file_count().await, 0);
}

// =============================================================================
// Ledger
// =============================================================================

#[tokio::test]
async fn test_events_and_runs_reach_the_ledger() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let ledger = Arc::new(
        SqliteLedgerStore::new(&temp_dir.path().join("ledger.db"))
            .expect("Failed to create ledger"),
    );
    let (events, writer) = create_event_pipeline(ledger.clone(), 256);
    let writer_task = tokio::spawn(writer.run());

    let harness = TestHarness::new();
    harness.tracker.set_status("OPS-42", "Approved").await;
    let orchestrator = harness
        .orchestrator()
        .with_events(events)
        .with_ledger(ledger.clone())
        .with_config_hash("cafebabe");

    let run = orchestrator
        .run(request("prd", 2), &CancelToken::new())
        .await;
    assert!(run.is_succeeded(), "{:?}", run.diagnostic());

    // Dropping the last handle lets the writer drain and stop
    drop(orchestrator);
    writer_task.await.expect("writer task");

    let stored = tokio_test::assert_ok!(ledger.get_run(&run.run_id)).expect("run saved");
    assert_eq!(stored.summary.outcome, "succeeded");
    assert_eq!(stored.summary.target_environment, "prd");

    let events = tokio_test::assert_ok!(ledger.events_for_run(&run.run_id));
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types.first(), Some(&"run_started"));
    assert_eq!(types.last(), Some(&"run_finished"));
    for expected in [
        "session_opened",
        "job_submitted",
        "job_finished",
        "artifact_published",
        "gate_checked",
        "artifact_fetched",
    ] {
        assert!(types.contains(&expected), "missing {} in {:?}", expected, types);
    }
    assert!(events
        .iter()
        .all(|e| e.run_id.as_deref() == Some(run.run_id.as_str())));

    let failed = tokio_test::assert_ok!(
        ledger.list_runs(&RunFilter::new().with_outcome("failed"))
    );
    assert!(failed.is_empty());
}
