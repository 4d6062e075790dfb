use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use foostats::config::Config;
use foostats::replicate::Replicator;
use foostats::store::SnapshotStore;
use foostats::{ingest, merge, report};

/// Privacy-preserving web and Gemini analytics pipeline.
#[derive(Parser)]
#[command(name = "foostats", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the snapshot directory.
    #[arg(long)]
    stats_dir: Option<PathBuf>,

    /// Override the report directory.
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Override the odd-pattern blocklist file.
    #[arg(long)]
    patterns: Option<PathBuf>,

    /// Override the filter decision log file.
    #[arg(long)]
    filter_log: Option<PathBuf>,

    /// Replace the configured peer list (repeatable).
    #[arg(long)]
    peer: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Read access logs and persist day snapshots.
    Ingest,
    /// Fetch peer snapshots for the report window.
    Replicate,
    /// Merge the window and render the gemtext reports.
    Report,
    /// Run ingest, replicate, and report in order.
    All,
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    /// Release version string.
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} ({}/{})",
            RELEASE,
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("foostats {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    // CLI flags win over the file.
    if let Some(dir) = cli.stats_dir {
        cfg.stats_dir = dir;
    }
    if let Some(dir) = cli.report_dir {
        cfg.report_dir = dir;
    }
    if let Some(path) = cli.patterns {
        cfg.patterns_file = path;
    }
    if let Some(path) = cli.filter_log {
        cfg.filter_log = path;
    }
    if !cli.peer.is_empty() {
        cfg.peers = cli.peer;
    }

    cfg.validate()?;

    tracing::info!(
        version = version::RELEASE,
        host = %cfg.local_host,
        "starting foostats",
    );

    match cli.command.unwrap_or(Command::All) {
        Command::Ingest => ingest::run(&cfg),
        Command::Replicate => run_replicate(&cfg),
        Command::Report => run_report(&cfg),
        Command::All => {
            ingest::run(&cfg)?;
            run_replicate(&cfg)?;
            run_report(&cfg)
        }
        Command::Version => Ok(()),
    }
}

/// Drives the async replication pass on a runtime built for the occasion.
fn run_replicate(cfg: &Config) -> Result<()> {
    if cfg.peers.is_empty() {
        tracing::info!("no peers configured, skipping replication");
        return Ok(());
    }

    let replicator = Replicator::new(
        cfg.stats_dir.clone(),
        cfg.peers.clone(),
        cfg.replication.timeout,
    )?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(replicator.run(Local::now().date_naive()))
}

/// Merges the report window and renders the gemtext pages.
fn run_report(cfg: &Config) -> Result<()> {
    let store = SnapshotStore::new(&cfg.stats_dir, &cfg.local_host);
    let days = merge::merge_window(&store, Local::now().date_naive())?;

    tracing::info!(days = days.len(), "merged report window");

    report::write_reports(&cfg.report_dir, &days)
}
