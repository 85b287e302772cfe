//! Replay Archive - rebuild standings from finished logs
//!
//! Replays every log in the archive directory, then writes one snapshot and
//! exits. Useful after editing team styles or scoring rules.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin replay_archive            # writes OUTPUT_JSON
//! cargo run --release --bin replay_archive -- --stdout
//! ```
//!
//! Reads the same environment variables as `standings_monitor`.

use chrono::Utc;
use matchboard::config::MonitorConfig;
use matchboard::standings_core::{
    replay_archive, ArchiveLogSource, FileSnapshotSink, Match, ScoringEngine, SnapshotBuilder,
    SnapshotSink, TeamDirectory,
};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let to_stdout = env::args().any(|arg| arg == "--stdout");
    let config = MonitorConfig::from_env()?;

    log::info!("📚 Replaying archive {}", config.archive_log_dir.display());

    let archive = ArchiveLogSource::new(config.archive_log_dir.clone(), config.log_extensions.clone());
    let matches = replay_archive(&archive).await;
    if matches.is_empty() {
        log::warn!("⚠️  No matches found in {}", config.archive_log_dir.display());
    }

    let engine = ScoringEngine::new(config.scoring.clone());
    let teams = TeamDirectory::load(
        &config.team_config_file,
        &config.logo_url_prefix,
        config.default_team_style(),
    );

    let counted: Vec<&Match> = matches.iter().collect();
    let latest = counted.iter().max_by(|a, b| a.id.cmp(&b.id)).copied();
    let snapshot = SnapshotBuilder::new(&engine, &teams, config.top_players)
        .build(&counted, latest, Utc::now());

    for entry in &snapshot.overall_standings {
        let row = &entry.row;
        log::info!(
            "   #{} {} - {} pts ({} placement, {} kills, {} WWCD, avg {:.2})",
            row.rank,
            row.team,
            row.points,
            row.placement_points,
            row.kills,
            row.wwcd,
            row.average_placement
        );
    }

    if to_stdout {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        let mut sink = FileSnapshotSink::new(config.output_json.clone());
        sink.write_snapshot(&snapshot).await?;
        log::info!(
            "✅ Wrote {} matches to {} ({})",
            snapshot.matches_counted,
            config.output_json.display(),
            sink.sink_type()
        );
    }

    Ok(())
}
