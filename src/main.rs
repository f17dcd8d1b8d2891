//! Notice Harvester main entry point
//!
//! This is the command-line interface for the notice harvester.

use anyhow::Context;
use clap::Parser;
use notice_harvester::config::{load_config_with_hash, Config};
use notice_harvester::harvest::{run_harvest, HarvestMode};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Notice Harvester: an adaptive notice extraction engine
///
/// Periodically scrapes configured procurement and empanelment pages,
/// extracts notices with table and list parsers (falling back to a language
/// model), and stores new records in a SQLite database.
#[derive(Parser, Debug)]
#[command(name = "notice-harvester")]
#[command(version)]
#[command(about = "An adaptive notice extraction engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run every due source once, wait for the runs and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    once: bool,

    /// With --once, run only this source, even if it is not due yet
    #[arg(long, value_name = "ID", requires = "once")]
    source: Option<String>,

    /// Validate config and show what would be harvested without fetching anything
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else {
        let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
        let mode = match (cli.once, cli.source) {
            (true, Some(source_id)) => HarvestMode::Source(source_id),
            (true, None) => HarvestMode::Once,
            (false, _) => HarvestMode::Continuous,
        };
        runtime.block_on(handle_harvest(&cli.config, config, mode))
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("notice_harvester=info,warn"),
            1 => EnvFilter::new("notice_harvester=debug,info"),
            2 => EnvFilter::new("notice_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be harvested
fn handle_dry_run(config: &Config) {
    println!("=== Notice Harvester Dry Run ===\n");

    let harvester = &config.harvester;
    println!("Harvester Configuration:");
    println!("  Max concurrent runs: {}", harvester.max_concurrent_runs);
    println!("  Tick interval: {}s", harvester.tick_interval_secs);
    println!("  Fetch timeout: {}s", harvester.fetch_timeout_secs);
    println!("  Attempt deadline: {}s", harvester.attempt_deadline_secs);
    println!(
        "  Transport retries: {} (base delay {}ms, jittered)",
        harvester.transport_retries, harvester.retry_delay_ms
    );
    println!(
        "  Max backoff multiplier: {}x",
        harvester.max_backoff_multiplier
    );

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nLanguage Model:");
    println!("  Endpoint: {}", config.llm.endpoint);
    println!("  Model: {}", config.llm.model);
    println!("  Timeout: {}s", config.llm.timeout_secs);
    println!("  Max input: {} chars", config.llm.max_input_chars);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nSources ({}):", config.sources.len());
    for source in &config.sources {
        let shape = source
            .page_shape
            .map(|s| s.to_string())
            .unwrap_or_else(|| "auto".to_string());
        println!(
            "  - {} [{}] every {}m, shape: {}{}",
            source.id,
            source.name,
            source.min_interval_minutes,
            shape,
            if source.active { "" } else { " (inactive)" }
        );
        println!("    * {}", source.url);
    }

    let active = config.sources.iter().filter(|s| s.active).count();
    println!("\n✓ Configuration is valid");
    println!("✓ Would harvest {} active source(s)", active);
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use notice_harvester::output::{load_statistics, print_statistics};
    use notice_harvester::storage::SqliteStore;

    println!("Database: {}\n", config.output.database_path);

    // Open the database
    let store = SqliteStore::new(Path::new(&config.output.database_path))
        .context("failed to open database")?;

    // Load statistics
    let stats = load_statistics(&store, chrono::Utc::now()).context("failed to load statistics")?;

    // Print statistics
    print_statistics(&stats);

    Ok(())
}

/// Handles the main harvest loop
async fn handle_harvest(config_path: &Path, config: Config, mode: HarvestMode) -> anyhow::Result<()> {
    match &mode {
        HarvestMode::Source(source_id) => {
            tracing::info!("Running source {} once", source_id);
        }
        _ => tracing::info!(
            "Starting harvest of {} source(s) with {} worker(s){}",
            config.sources.iter().filter(|s| s.active).count(),
            config.harvester.max_concurrent_runs,
            if mode == HarvestMode::Once { ", single pass" } else { "" }
        ),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl-C, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::warn!("Could not listen for Ctrl-C: {}", e);
                // Keep the sender alive so the harvest loop keeps running
                std::future::pending::<()>().await;
            }
        }
    });

    match run_harvest(config_path, config, mode, shutdown_rx).await {
        Ok(summary) => {
            tracing::info!(
                "Harvest completed: {} run(s), {} new record(s)",
                summary.completed(),
                summary.new_records
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}
