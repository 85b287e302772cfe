//! Standings Monitor - live battle-royale scoreboard
//!
//! Counts the earlier logs already in the live directory, then follows the
//! newest one and finalizes matches as they end. One JSON snapshot of
//! per-match and cumulative standings is kept up to date. Finished logs in
//! the archive directory are replayed once at startup and counted toward the
//! cumulative table.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin standings_monitor
//! ```
//!
//! ## Environment Variables
//!
//! See [`MonitorConfig::from_env`]; `RUST_LOG` sets the log level (default: info).
//! Creating the `FORCE_END_FLAG` file ends the running match on the next poll.

use matchboard::aggregator::{AggregationLoop, LoopSettings};
use matchboard::config::MonitorConfig;
use matchboard::persistence::CheckpointStore;
use matchboard::standings_core::{
    replay_archive, ArchiveLogSource, FileSnapshotSink, LiveLogSource, Match, ScoringEngine,
    SnapshotPublisher, TeamDirectory,
};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = match MonitorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("❌ {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = config.prepare_directories() {
        log::error!("❌ {}", e);
        std::process::exit(1);
    }

    log::info!("🚀 Starting Standings Monitor");
    log::info!("   Live logs: {}", config.live_log_dir.display());
    log::info!("   Archive logs: {}", config.archive_log_dir.display());
    log::info!("   Extensions: {}", config.log_extensions.join(", "));
    log::info!("   Output: {}", config.output_json.display());
    log::info!("   Placement points: {:?}", config.scoring.placement_points);
    log::info!("   Kill points: {}", config.scoring.kill_points);
    log::info!("   Poll interval: {}ms", config.poll_interval_ms);
    match config.inactivity_timeout() {
        Some(timeout) => log::info!("   Inactivity timeout: {}s", timeout.as_secs()),
        None => log::info!("   Inactivity timeout: disabled"),
    }
    if let Some(flag) = &config.force_end_flag {
        log::info!("   Force-end flag: {}", flag.display());
    }

    let teams = TeamDirectory::load(
        &config.team_config_file,
        &config.logo_url_prefix,
        config.default_team_style(),
    );
    log::info!("🎨 {} team styles loaded", teams.len());

    // Archive replay runs beside the live loop and lands in one swap
    let (archive_tx, archive_rx) = watch::channel(Arc::new(Vec::<Match>::new()));
    let archive = ArchiveLogSource::new(config.archive_log_dir.clone(), config.log_extensions.clone());
    tokio::spawn(async move {
        log::info!("📚 Replaying archive {}", archive.dir().display());
        let matches = replay_archive(&archive).await;
        log::info!("📚 Archive replay finished: {} matches", matches.len());
        if archive_tx.send(Arc::new(matches)).is_err() {
            log::warn!("⚠️  Aggregation loop gone before the archive replay finished");
        }
    });

    let source = LiveLogSource::new(config.live_log_dir.clone(), config.log_extensions.clone())
        .with_max_read_bytes(config.max_read_bytes);
    let publisher = SnapshotPublisher::new(Box::new(FileSnapshotSink::new(config.output_json.clone())));

    let mut aggregation = AggregationLoop::new(
        LoopSettings::from_config(&config),
        source,
        ScoringEngine::new(config.scoring.clone()),
        teams,
        publisher,
        archive_rx,
    );

    if let Some(path) = &config.checkpoint_path {
        let store = CheckpointStore::new(path.clone());
        match store.load() {
            Ok(Some(checkpoint)) => aggregation.restore(checkpoint),
            Ok(None) => {}
            Err(e) => log::warn!("⚠️  Ignoring unreadable checkpoint {}: {}", path.display(), e),
        }
        aggregation = aggregation.with_checkpoint_store(store);
    }

    // Completed logs of the current phase that the live source has not read yet
    aggregation.replay_live_backlog().await;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("❌ Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        log::info!("🛑 Shutdown requested");
        let _ = stop_tx.send(true);
    });

    let stopped = aggregation.run(stop_rx).await;
    let stats = stopped.assembler().stats();
    log::info!(
        "👋 Done: {} matches this session, {} lines read ({} malformed, {} rejected)",
        stopped.session_matches().len(),
        stats.lines,
        stats.malformed,
        stats.rejected
    );

    Ok(())
}
