// src/main.rs

//! listwatch: listing page change detection CLI
//!
//! Periodically invoked (cron, systemd timer) to re-check configured
//! listing pages, record added/removed items, and push notifications.

use clap::{Parser, Subcommand};
use chrono::{Duration, Utc};

use listwatch::error::{AppError, Result};
use listwatch::models::Config;
use listwatch::notify::{Channel, WebhookChannel};
use listwatch::pipeline::{compute_statistics, gate, run_cycle};
use listwatch::services::{HttpFetcher, SelectorExtractor};
use listwatch::storage::SqliteStore;
use listwatch::utils::log;

#[derive(Parser, Debug)]
#[command(
    name = "listwatch",
    version,
    about = "Listing page change detection and notification"
)]

/// CLI Arguments
struct Cli {
    #[arg(short, long, default_value = "data/config.toml")]
    config: String,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

/// CLI Commands
#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and register configured areas
    Init,
    /// Run one observation cycle
    Run {
        /// Compute and log diffs without writing or notifying
        #[arg(long)]
        dry_run: bool,
    },
    /// Report vacancy statistics over a recent window
    Stats {
        /// Window length in days, ending now
        #[arg(long, default_value_t = 30)]
        days: i64,

        /// Restrict to one area by its source URL
        #[arg(long)]
        area: Option<String>,
    },
    /// Validate configuration without touching the database
    Validate,
}

/// Main entry point
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config);
    if cli.quiet {
        config.logging.level = "error".to_string();
        config.logging.show_progress = false;
    }

    // Console output plus the log facade for library-level diagnostics.
    log::init(&config.logging.level);
    init_log_facade(&config.logging.level);

    match cli.command {
        Command::Init => init(&config)?,
        Command::Run { dry_run } => run(&config, dry_run).await?,
        Command::Stats { days, area } => stats(&config, days, area.as_deref())?,
        Command::Validate => validate(&config)?,
    }

    Ok(())
}

fn init_log_facade(level: &str) {
    let filter = match level {
        "debug" | "info" | "warn" | "error" => level,
        _ => "info",
    };
    let _ = env_logger::Builder::new().parse_filters(filter).try_init();
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    let store = SqliteStore::open(&config.storage.db_path)?;
    store.initialize()?;
    store.sync_areas(
        &config
            .areas
            .iter()
            .map(|a| a.url.clone())
            .collect::<Vec<_>>(),
    )?;
    Ok(store)
}

fn init(config: &Config) -> Result<()> {
    config.validate()?;
    let _store = open_store(config)?;
    log::success(&format!(
        "Database ready at {} with {} area(s)",
        config.storage.db_path,
        config.areas.len()
    ));
    Ok(())
}

async fn run(config: &Config, dry_run: bool) -> Result<()> {
    config.validate()?;
    let store = open_store(config)?;
    let fetcher = HttpFetcher::new(&config.crawler)?;
    let extractor = SelectorExtractor::new();

    let mut channels: Vec<Box<dyn Channel>> = Vec::with_capacity(config.channels.len());
    for channel_config in &config.channels {
        channels.push(Box::new(WebhookChannel::from_config(channel_config)?));
    }

    log::header(if dry_run {
        "Observation cycle (dry run)"
    } else {
        "Observation cycle"
    });

    let summary = run_cycle(config, &store, &fetcher, &extractor, &channels, dry_run).await?;

    log::summary(
        "Cycle complete",
        &[
            ("Areas changed", summary.areas_changed.to_string()),
            ("Areas unchanged", summary.areas_unchanged.to_string()),
            ("Areas failed", summary.areas_failed.to_string()),
            ("Items added", summary.added_events.to_string()),
            ("Items removed", summary.removed_events.to_string()),
            ("Notifications delivered", summary.dispatch.delivered.to_string()),
            ("Notifications deferred", summary.dispatch.deferred.to_string()),
            ("Notifications unroutable", summary.dispatch.unroutable.to_string()),
            ("Events swept", summary.swept_events.to_string()),
        ],
    );
    Ok(())
}

fn stats(config: &Config, days: i64, area: Option<&str>) -> Result<()> {
    let store = open_store(config)?;

    let area_id = match area {
        Some(url) => Some(
            store
                .area_by_url(url)?
                .ok_or_else(|| AppError::validation(format!("unknown area: {url}")))?
                .id,
        ),
        None => None,
    };

    let until = Utc::now();
    let since = until - Duration::days(days);
    let events = store.events_between(since, until, area_id)?;
    let cycles = store.cycles_between(since, until)?;
    let report = compute_statistics(&events, cycles);

    log::summary(
        &format!("Statistics over the last {days} day(s)"),
        &[
            ("Cycles", report.cycles.to_string()),
            ("Items listed", report.added_events.to_string()),
            ("Items delisted", report.removed_events.to_string()),
            ("Listings per cycle", format!("{:.2}", report.occurrence_rate)),
            ("Closed lifecycles", report.closed_lifecycles.to_string()),
            ("Avg dwell", format_secs(report.avg_dwell_secs)),
            ("Reoccurring items", report.reoccurring_items.to_string()),
            ("Avg relist gap", format_secs(report.avg_reoccurrence_secs)),
        ],
    );
    Ok(())
}

fn format_secs(value: Option<f64>) -> String {
    match value {
        Some(secs) if secs >= 3600.0 => format!("{:.1}h", secs / 3600.0),
        Some(secs) if secs >= 60.0 => format!("{:.1}m", secs / 60.0),
        Some(secs) => format!("{secs:.0}s"),
        None => "n/a".to_string(),
    }
}

fn validate(config: &Config) -> Result<()> {
    config.validate()?;
    for area in &config.areas {
        gate::compile_volatile_patterns(&area.volatile_patterns)
            .map_err(|e| AppError::validation(format!("area {}: {e}", area.url)))?;
    }
    log::success(&format!(
        "Configuration valid: {} area(s), {} channel(s)",
        config.areas.len(),
        config.channels.len()
    ));
    Ok(())
}
