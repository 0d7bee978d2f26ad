//! quota-guardd - abuse sweep daemon.
//!
//! Runs the sweep path next to an API server that embeds `AbuseGuard` and
//! writes the shared event log. The daemon scans that log on a schedule,
//! applies sanctions through external commands and reverts them on expiry.
//!
//! # Usage
//!
//! ```bash
//! # Long-running daemon
//! quota-guardd --config /etc/quota-guard.toml run
//!
//! # One recovery pass plus one sweep, e.g. from a scheduler
//! quota-guardd --config /etc/quota-guard.toml sweep
//!
//! # Report who would be flagged right now, without enforcing
//! quota-guardd scan
//!
//! # Show persisted sanctions
//! quota-guardd list
//! ```
//!
//! `RUST_LOG` controls log verbosity (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quota_guard::{
    Clock, EnforcementAdapter, EnforcementEngine, FileEventLog, FileJournal, GuardConfig,
    JsonDirectory, JsonFileStore, Metrics, NoopAdapter, SanctionStore, Sweeper, SystemClock,
    WindowAggregator,
};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quota-guardd", version, about = "Log-driven abuse enforcement daemon")]
struct Args {
    /// Path to TOML configuration file; built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log enforcement actions instead of running commands.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run sweeps until interrupted (default)
    Run,
    /// Recover, run a single sweep and exit
    Sweep,
    /// Scan the event log and print flagged principals
    Scan,
    /// Print persisted sanctions
    List,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

fn load_config(args: &Args) -> Result<GuardConfig> {
    let config = match &args.config {
        Some(path) => GuardConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => GuardConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn build_sweeper(config: &GuardConfig, dry_run: bool) -> Result<Sweeper> {
    let metrics = Metrics::new();
    let adapter: Arc<dyn EnforcementAdapter> = if dry_run || config.enforcement.dry_run {
        info!("dry run: enforcement commands will not be executed");
        Arc::new(NoopAdapter)
    } else {
        Arc::new(config.command_adapter())
    };

    let engine = EnforcementEngine::new(
        config.engine_config()?,
        adapter,
        Arc::new(JsonFileStore::new(&config.paths.sanctions)),
        Arc::new(FileJournal::new(&config.paths.journal)),
        metrics.clone(),
    )
    .with_directory(Arc::new(JsonDirectory::new(&config.paths.users)));

    Ok(Sweeper::new(
        WindowAggregator::new(config.aggregator_config()?, metrics),
        Arc::new(engine),
        Arc::new(FileEventLog::new(&config.paths.event_log)),
        Arc::new(SystemClock::new()),
        config.sweeper_config()?,
    ))
}

async fn run(config: &GuardConfig, dry_run: bool) -> Result<()> {
    let sweeper = build_sweeper(config, dry_run)?;
    let engine = Arc::clone(sweeper.engine());

    let (handle, recovery) = sweeper.start().await.context("failed to recover persisted sanctions")?;
    info!(
        loaded = recovery.loaded,
        reverted = recovery.reconciled.reverted,
        "sweeper running"
    );

    shutdown_signal().await;

    let grace = config.shutdown_grace();
    if let Err(e) = handle.shutdown(grace).await {
        error!(error = %e, "sweeper did not shut down cleanly");
    }
    let snapshot = engine.metrics().snapshot();
    info!(
        sweeps = snapshot.sweeps_completed,
        applied = snapshot.sanctions_applied,
        reverted = snapshot.sanctions_reverted,
        adapter_failures = snapshot.adapter_failures,
        "stopped"
    );
    Ok(())
}

async fn sweep(config: &GuardConfig, dry_run: bool) -> Result<()> {
    let sweeper = build_sweeper(config, dry_run)?;
    let now = SystemClock::new().now();
    sweeper
        .engine()
        .recover(now)
        .await
        .context("failed to recover persisted sanctions")?;

    let report = sweeper.sweep_once().await;
    info!(
        flags = report.scan.as_ref().map_or(0, |s| s.flags.len()),
        applied = report.applied,
        deferred = report.deferred,
        reverted = report.reconciled.reverted,
        "sweep complete"
    );
    Ok(())
}

fn scan(config: &GuardConfig) -> Result<()> {
    let aggregator = WindowAggregator::new(config.aggregator_config()?, Metrics::new());
    let log = FileEventLog::new(&config.paths.event_log);
    let window = aggregator.config().window;
    let report = aggregator
        .scan(&log, window, SystemClock::new().now())
        .with_context(|| format!("failed to read {}", log.path().display()))?;

    println!(
        "{} lines, {} in window, {} malformed",
        report.lines_read, report.events_in_window, report.parse_errors
    );
    for flag in &report.flags {
        let addresses: Vec<String> = flag.source_addresses.iter().map(|a| a.to_string()).collect();
        println!(
            "{}\t{}\t{}",
            flag.principal_id,
            flag.window_count,
            addresses.join(",")
        );
    }
    Ok(())
}

fn list(config: &GuardConfig) -> Result<()> {
    let store = JsonFileStore::new(&config.paths.sanctions);
    let records = store
        .load()
        .with_context(|| format!("failed to read {}", store.path().display()))?;
    let now = SystemClock::new().now();

    for record in records {
        let state = if record.is_expired(now) { "expired" } else { "active" };
        println!(
            "{}\t{}\t{}\t{}\t{}",
            record.action_kind,
            record.subject,
            state,
            record.expires_at.to_rfc3339(),
            record.reason
        );
    }
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&config, args.dry_run).await,
        Command::Sweep => sweep(&config, args.dry_run).await,
        Command::Scan => scan(&config),
        Command::List => list(&config),
    }
}
