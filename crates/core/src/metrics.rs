//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrator (runs, stage failures)
//! - Job polling (poll ticks, job durations)
//! - Artifact store and promotion gate
//! - External services (platform, repository, tracker)

use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

// =============================================================================
// Orchestrator Metrics
// =============================================================================

/// Promotion runs total by outcome.
pub static RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("promote_runs_total", "Total promotion runs"),
        &["outcome"], // "succeeded", "failed"
    )
    .unwrap()
});

/// Stage failures total by stage.
pub static STAGE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "promote_stage_failures_total",
            "Total promotion runs that failed, by failing stage",
        ),
        &["stage"],
    )
    .unwrap()
});

/// Promotion run duration in seconds.
pub static RUN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("promote_run_duration_seconds", "Duration of promotion runs")
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["outcome"],
    )
    .unwrap()
});

// =============================================================================
// Job Metrics
// =============================================================================

/// Poll ticks total.
pub static JOB_POLLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("promote_job_polls_total", "Total job status polls"),
        &["kind", "result"], // result: "ok", "transient_error"
    )
    .unwrap()
});

/// Time from submission to terminal status.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "promote_job_duration_seconds",
            "Duration of platform jobs from submission to terminal status",
        )
        .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["kind", "status"],
    )
    .unwrap()
});

// =============================================================================
// Artifact and Gate Metrics
// =============================================================================

/// Publish attempts by result.
pub static ARTIFACT_PUBLISHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("promote_artifact_publishes_total", "Total artifact publishes"),
        &["result"], // "created", "reused", "conflict", "error"
    )
    .unwrap()
});

/// Gate checks by result.
pub static GATE_CHECKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("promote_gate_checks_total", "Total promotion gate checks"),
        &["result"], // "approved", "not_approved", "no_ticket", "unavailable"
    )
    .unwrap()
});

// =============================================================================
// External Service Metrics
// =============================================================================

/// External service requests total.
pub static EXTERNAL_SERVICE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "promote_external_service_requests_total",
            "Total external service requests",
        ),
        &["service", "operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Record an external service call outcome.
pub fn record_external_call(service: &str, operation: &str, success: bool) {
    EXTERNAL_SERVICE_REQUESTS
        .with_label_values(&[service, operation, if success { "success" } else { "error" }])
        .inc();
}

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Orchestrator
        Box::new(RUNS_TOTAL.clone()),
        Box::new(STAGE_FAILURES.clone()),
        Box::new(RUN_DURATION.clone()),
        // Jobs
        Box::new(JOB_POLLS.clone()),
        Box::new(JOB_DURATION.clone()),
        // Artifacts and gate
        Box::new(ARTIFACT_PUBLISHES.clone()),
        Box::new(GATE_CHECKS.clone()),
        // External services
        Box::new(EXTERNAL_SERVICE_REQUESTS.clone()),
    ]
}

/// Build a registry containing every core metric.
pub fn create_registry() -> Registry {
    let registry = Registry::new();
    for metric in all_metrics() {
        if let Err(e) = registry.register(metric) {
            tracing::warn!("Failed to register metric: {}", e);
        }
    }
    registry
}

/// Encode the registry in the Prometheus text exposition format.
pub fn encode_metrics(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
