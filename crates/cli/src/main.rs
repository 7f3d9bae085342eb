use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use promotion_core::{
    artifact::AssetManifest,
    create_event_pipeline, load_config,
    metrics::{create_registry, encode_metrics},
    validate_config, CancelToken, Config, IicsClient, JiraClient, LedgerStore, NexusRepository,
    Orchestrator, OrchestratorConfig, PromotionRequest, PromotionRun, RunFilter,
    SanitizedConfig, SqliteLedgerStore, TriggerContext,
};

/// Buffer size for the pipeline event channel
const EVENT_BUFFER_SIZE: usize = 1000;

/// Config file used when neither `--config` nor `PROMOTE_CONFIG` is given
const DEFAULT_CONFIG_PATH: &str = "promote.toml";

#[derive(Parser)]
#[command(name = "promote", version, about = "Promote asset bundles between environments")]
struct Cli {
    /// Configuration file (defaults to $PROMOTE_CONFIG, then promote.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export from the source environment, publish, and import into the target
    Run {
        /// Target environment (e.g. uat, prd)
        #[arg(long)]
        target: String,

        /// Source environment
        #[arg(long, default_value = "dev")]
        source: String,

        /// JSON asset list to export
        #[arg(long)]
        assets: PathBuf,

        /// Version label (defaults to the commit SHA, else local-dev)
        #[arg(long)]
        version: Option<String>,

        /// Ticket to check when the commit message carries none
        #[arg(long)]
        ticket: Option<String>,

        /// Cancel the run after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Write Prometheus metrics to this file when the run ends
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },

    /// List recorded runs, most recent first
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,

        /// Only runs into this environment
        #[arg(long)]
        target: Option<String>,
    },

    /// Print the effective configuration with secrets redacted
    ShowConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match dispatch(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let config_path = cli
        .config
        .or_else(|| std::env::var("PROMOTE_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = load(&config_path)?;

    match cli.cmd {
        Command::Run {
            target,
            source,
            assets,
            version,
            ticket,
            timeout_secs,
            metrics_out,
        } => {
            let manifest = read_manifest(&assets)?;
            let mut request = PromotionRequest::new(source, target, trigger_from_env(ticket), manifest);
            if let Some(version) = version {
                request = request.with_version_label(version);
            }

            let run = promote(config, request, timeout_secs).await?;

            if let Some(path) = metrics_out {
                let text = encode_metrics(&create_registry());
                std::fs::write(&path, text)
                    .with_context(|| format!("Failed to write metrics to {:?}", path))?;
            }

            match run.diagnostic() {
                None => {
                    println!(
                        "run {} succeeded: {} -> {} ({})",
                        run.run_id, run.source_environment, run.target_environment, run.version_label
                    );
                    Ok(0)
                }
                Some(diagnostic) => {
                    eprintln!("{}", diagnostic);
                    Ok(1)
                }
            }
        }
        Command::History { limit, target } => {
            let ledger = SqliteLedgerStore::new(&config.ledger.path)
                .with_context(|| format!("Failed to open ledger at {:?}", config.ledger.path))?;
            let mut filter = RunFilter::new().with_limit(limit);
            if let Some(target) = target {
                filter = filter.with_target(target);
            }
            for run in ledger.list_runs(&filter).context("Failed to list runs")? {
                println!(
                    "{}  {}  {} -> {}  {:<9}  {}{}",
                    run.started_at.to_rfc3339(),
                    run.run_id,
                    run.source_environment,
                    run.target_environment,
                    run.outcome,
                    run.version_label.as_deref().unwrap_or("-"),
                    run.failed_stage
                        .map(|stage| format!("  failed at {}", stage))
                        .unwrap_or_default(),
                );
            }
            Ok(0)
        }
        Command::ShowConfig => {
            let sanitized = SanitizedConfig::from(&config);
            println!(
                "{}",
                serde_json::to_string_pretty(&sanitized).context("Failed to render config")?
            );
            println!("config_hash: {}", sanitized.config_hash());
            Ok(0)
        }
    }
}

fn load(path: &Path) -> Result<Config> {
    info!("Loading configuration from {:?}", path);
    let mut config =
        load_config(path).with_context(|| format!("Failed to load config from {:?}", path))?;
    validate_config(&config).context("Configuration validation failed")?;

    if config.repository.project.is_empty() {
        if let Ok(project) = std::env::var("CI_PROJECT_NAME") {
            config.repository.project = project;
        }
    }
    Ok(config)
}

fn read_manifest(path: &Path) -> Result<AssetManifest> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read asset list {:?}", path))?;
    AssetManifest::from_json(&json).with_context(|| format!("Invalid asset list {:?}", path))
}

/// Trigger context from the CI environment.
fn trigger_from_env(ticket: Option<String>) -> TriggerContext {
    let mut trigger = TriggerContext::new();
    if let Ok(message) = std::env::var("CI_COMMIT_MESSAGE") {
        trigger = trigger.with_commit_message(message);
    }
    if let Ok(title) = std::env::var("CI_MERGE_REQUEST_TITLE") {
        trigger = trigger.with_merge_request_title(title);
    }
    if let Ok(sha) = std::env::var("CI_COMMIT_SHORT_SHA") {
        trigger = trigger.with_commit_sha(sha);
    }
    if let Ok(actor) = std::env::var("GITLAB_USER_LOGIN") {
        trigger = trigger.with_actor(actor);
    }
    if let Some(ticket) = ticket {
        trigger = trigger.with_explicit_ticket(ticket);
    }
    trigger
}

async fn promote(
    config: Config,
    request: PromotionRequest,
    timeout_secs: Option<u64>,
) -> Result<PromotionRun> {
    let config_hash = SanitizedConfig::from(&config).config_hash();

    let platform =
        Arc::new(IicsClient::new(&config.platform).context("Failed to create platform client")?);
    let repository = Arc::new(
        NexusRepository::new(config.repository.clone())
            .context("Failed to create repository client")?,
    );
    let tracker =
        Arc::new(JiraClient::new(config.tracker.clone()).context("Failed to create tracker client")?);
    info!(repository = %config.repository.url, tracker = %config.tracker.url, "Clients initialized");

    let mut orchestrator = Orchestrator::new(
        OrchestratorConfig::from(&config),
        platform,
        repository,
        tracker,
    )
    .with_config_hash(config_hash.get(..16).unwrap_or(&config_hash));

    // Event pipeline into the ledger
    let mut writer_task = None;
    if config.ledger.enabled {
        let ledger: Arc<dyn LedgerStore> = Arc::new(
            SqliteLedgerStore::new(&config.ledger.path)
                .with_context(|| format!("Failed to open ledger at {:?}", config.ledger.path))?,
        );
        let (events, writer) = create_event_pipeline(Arc::clone(&ledger), EVENT_BUFFER_SIZE);
        writer_task = Some(tokio::spawn(writer.run()));
        orchestrator = orchestrator.with_events(events).with_ledger(ledger);
        info!("Run ledger at {:?}", config.ledger.path);
    }

    let cancel = CancelToken::new();
    spawn_cancel_triggers(&cancel, timeout_secs);

    let run = orchestrator.run(request, &cancel).await;

    // Let the writer drain the remaining events
    drop(orchestrator);
    if let Some(task) = writer_task {
        if let Err(e) = task.await {
            warn!("Event writer did not shut down cleanly: {}", e);
        }
    }

    Ok(run)
}

/// Cancel on Ctrl-C and, if set, after the timeout.
fn spawn_cancel_triggers(cancel: &CancelToken, timeout_secs: Option<u64>) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    if let Some(secs) = timeout_secs {
        let on_timeout = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(timeout_secs = secs, "Run timeout reached, cancelling");
            on_timeout.cancel();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["promote", "run", "--target", "prd", "--assets", "assets.json"])
            .unwrap();
        assert!(!cli.json_logs);
        match cli.cmd {
            Command::Run {
                target,
                source,
                version,
                timeout_secs,
                ..
            } => {
                assert_eq!(target, "prd");
                assert_eq!(source, "dev");
                assert!(version.is_none());
                assert!(timeout_secs.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "promote",
            "history",
            "--limit",
            "5",
            "--config",
            "ci.toml",
            "--json-logs",
        ])
        .unwrap();
        assert!(cli.json_logs);
        assert_eq!(cli.config, Some(PathBuf::from("ci.toml")));
        assert!(matches!(cli.cmd, Command::History { limit: 5, target: None }));
    }

    #[test]
    fn test_run_requires_target() {
        assert!(Cli::try_parse_from(["promote", "run", "--assets", "assets.json"]).is_err());
    }
}
