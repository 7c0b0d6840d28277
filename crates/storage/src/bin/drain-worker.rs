//! drain-worker: periodic archival drain for the ingestion queue.
//!
//! Each tick evaluates the drain triggers (queue depth, store memory, time
//! since the last drain), drains the oldest excess records to the export
//! directory when one fires, and sweeps archives past their retention.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use feedstash_core::config::{load_dotenv, Config};
use feedstash_queue::{QueueStore, RedisQueueStore};
use feedstash_storage::{ArchiveInventory, CycleReport, DrainCycle, StateFile};

// ── CLI ─────────────────────────────────────────────────────────────

/// Archive the oldest queued records once the queue outgrows its limits.
#[derive(Parser, Debug)]
#[command(name = "drain-worker", version, about)]
struct Cli {
    /// Seconds between trigger checks.
    #[arg(long, env = "DRAIN_TICK_SECS", default_value_t = 60)]
    tick_secs: u64,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,

    /// Drain state file (defaults to `.drain_state.json` in the export dir).
    #[arg(long, env = "DRAIN_STATE_FILE")]
    state_file: Option<PathBuf>,
}

fn log_report(report: &CycleReport) {
    match &report.drain {
        Some(stats) => info!(
            exported = stats.exported,
            errored = stats.errored,
            before = stats.queue_length_before,
            after = stats.queue_length_after,
            fallback = stats.fallback(),
            "Cycle drained queue"
        ),
        None => info!("Cycle finished, no drain due"),
    }
    if let Some(sweep) = &report.sweep {
        if sweep.skipped_unparseable > 0 {
            warn!(
                skipped = sweep.skipped_unparseable,
                "Archives without a parseable timestamp were left in place"
            );
        }
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    load_dotenv();
    let config = Config::from_env();
    config.log_summary();
    for warning in config.validate().into_result().context("invalid configuration")? {
        warn!("config: {}", warning);
    }

    let store = RedisQueueStore::connect(&config.redis)
        .await
        .with_context(|| format!("cannot reach Redis at {}", config.redis.redacted_url()))?;
    let store: Arc<dyn QueueStore> = Arc::new(store);
    info!(queue = %store.name(), "Connected to queue store");

    let queue_len = store.len().await.ok();
    match store.memory_usage().await {
        Ok(memory) => info!(queue_len = ?queue_len, memory = %memory, "Queue status"),
        Err(e) => warn!(error = %e, "Failed to read store memory usage"),
    }
    match ArchiveInventory::scan(&config.archive.export_dir) {
        Ok(inv) => info!(
            files = inv.files,
            total_mb = inv.total_mb(),
            oldest = ?inv.oldest,
            newest = ?inv.newest,
            "Archive inventory"
        ),
        Err(e) => warn!(error = %e, "Failed to scan export directory"),
    }

    let state = match cli.state_file {
        Some(path) => StateFile::new(path),
        None => StateFile::in_dir(&config.archive.export_dir),
    };
    let cycle = DrainCycle::from_config(store, &config, state);

    if cli.once {
        let report = cycle.run_once().await.context("drain cycle failed")?;
        log_report(&report);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!(tick_secs = cli.tick_secs, "drain-worker starting");
    let mut interval = tokio::time::interval(Duration::from_secs(cli.tick_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match cycle.run_once().await {
                    Ok(report) => log_report(&report),
                    Err(e) => error!(error = %e, "Drain cycle failed, retrying next tick"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("drain-worker exited cleanly");
    Ok(())
}
