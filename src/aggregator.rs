//! Polling loop tying the live log to the published snapshot
//!
//! One task owns the log source, the assembler and the matches finalized
//! this session. Archived matches arrive through a `watch` channel as an
//! immutable `Arc<Vec<Match>>` that each cycle clones.

use {
    crate::{
        config::MonitorConfig,
        persistence::{Checkpoint, CheckpointStore, CHECKPOINT_VERSION},
        standings_core::{
            read_finished, EndReason, LiveLogSource, LogFile, Match, MatchAssembler, MatchId,
            ScoringEngine, SnapshotBuilder, SnapshotPublisher, SourceEvent, TeamDirectory,
        },
    },
    chrono::Utc,
    std::{
        collections::{BTreeSet, HashSet},
        path::PathBuf,
        sync::Arc,
        time::{Duration, Instant},
    },
    tokio::{
        sync::watch,
        time::{interval, MissedTickBehavior},
    },
};

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub poll_interval: Duration,
    pub inactivity_timeout: Option<Duration>,
    pub force_end_flag: Option<PathBuf>,
    pub top_players: usize,
}

impl LoopSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            inactivity_timeout: config.inactivity_timeout(),
            force_end_flag: config.force_end_flag.clone(),
            top_players: config.top_players,
        }
    }
}

/// What one cycle did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub lines: usize,
    pub finalized: usize,
    pub discarded: usize,
    pub published: bool,
    pub source_error: bool,
}

pub struct AggregationLoop {
    settings: LoopSettings,
    source: LiveLogSource,
    assembler: MatchAssembler,
    session: Vec<Match>,
    archive: watch::Receiver<Arc<Vec<Match>>>,
    engine: ScoringEngine,
    teams: TeamDirectory,
    publisher: SnapshotPublisher,
    checkpoint: Option<CheckpointStore>,
    last_activity: Instant,
    dirty: bool,
}

impl AggregationLoop {
    pub fn new(
        settings: LoopSettings,
        source: LiveLogSource,
        engine: ScoringEngine,
        teams: TeamDirectory,
        publisher: SnapshotPublisher,
        archive: watch::Receiver<Arc<Vec<Match>>>,
    ) -> Self {
        Self {
            settings,
            source,
            assembler: MatchAssembler::new(),
            session: Vec::new(),
            archive,
            engine,
            teams,
            publisher,
            checkpoint: None,
            last_activity: Instant::now(),
            dirty: false,
        }
    }

    pub fn with_checkpoint_store(mut self, store: CheckpointStore) -> Self {
        self.checkpoint = Some(store);
        self
    }

    /// Continue from a saved checkpoint: cursor, open match and session matches
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.source.restore_cursor(checkpoint.cursor);
        self.source.restore_file_cursors(checkpoint.file_cursors);
        self.assembler = MatchAssembler::resume(
            checkpoint.current_source,
            checkpoint.in_progress,
            checkpoint.last_finalized,
            checkpoint.next_sequence,
        );
        self.session = checkpoint.session_matches;
        log::info!(
            "♻️  Restored {} session matches, next match #{}",
            self.session.len(),
            self.assembler.next_sequence()
        );
    }

    /// Count the finished logs already sitting in the live directory.
    ///
    /// Every log other than the newest one that the source has not read yet
    /// is replayed into the session, and its end is remembered so the live
    /// source never reads it again. Returns the number of matches added.
    pub async fn replay_live_backlog(&mut self) -> usize {
        let backlog = match self.source.backlog().await {
            Ok(files) => files,
            Err(e) => {
                log::warn!("⚠️  Cannot list earlier live logs: {}", e);
                return 0;
            }
        };
        if backlog.is_empty() {
            return 0;
        }

        let mut replay = MatchAssembler::with_sequence(self.assembler.next_sequence());
        let before = self.session.len();
        for path in backlog {
            let (lines, cursor) = match read_finished(&path).await {
                Ok(read) => read,
                Err(e) => {
                    log::warn!("⚠️  Skipping earlier live log: {}", e);
                    continue;
                }
            };
            let file = LogFile::from_path(&path);
            let matches = replay.assemble_finished(&file.name, &lines);
            log::info!("📚 {}: {} completed matches", file.name, matches.len());
            self.session.extend(matches);
            self.source.mark_finished(cursor);
        }
        self.assembler.reserve_sequences(replay.next_sequence());
        self.dirty = true;

        let added = self.session.len() - before;
        log::info!("📚 Counted {} matches from earlier live logs", added);
        added
    }

    pub fn session_matches(&self) -> &[Match] {
        &self.session
    }

    pub fn assembler(&self) -> &MatchAssembler {
        &self.assembler
    }

    /// Poll until `stop` turns true; the cycle in flight always completes
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Self {
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "✅ Aggregation loop running (poll every {}ms)",
            self.settings.poll_interval.as_millis()
        );

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    if report.lines > 0 || report.finalized > 0 || report.published {
                        let stats = self.assembler.stats();
                        log::info!(
                            "📊 Cycle: {} lines, {} finalized, published: {} | totals: {} applied, {} malformed, {} rejected",
                            report.lines,
                            report.finalized,
                            report.published,
                            stats.applied,
                            stats.malformed,
                            stats.rejected
                        );
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.save_checkpoint().await;
        log::info!("🛑 Aggregation loop stopped");
        self
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        match self.source.poll().await {
            Ok(events) => {
                for event in events {
                    self.handle_source_event(event, &mut report);
                }
            }
            Err(e) => {
                report.source_error = true;
                log::warn!("⚠️  Log source unavailable, retrying next cycle: {}", e);
            }
        }
        if report.lines > 0 {
            self.last_activity = Instant::now();
            self.dirty = true;
        }

        self.check_force_end(&mut report).await;
        self.check_inactivity(&mut report);

        report.published = self.publish().await;
        if self.dirty {
            self.save_checkpoint().await;
        }
        report
    }

    fn handle_source_event(&mut self, event: SourceEvent, report: &mut CycleReport) {
        match event {
            SourceEvent::Opened(file) => {
                if let Some(done) = self.assembler.finalize_current(EndReason::Rotated) {
                    self.accept(done, report);
                }
                log::info!("📂 Now following {}", file.name);
                self.assembler.begin_source(&file.name);
                self.last_activity = Instant::now();
                self.dirty = true;
            }
            SourceEvent::Reset(file) => {
                if let Some(id) = self.assembler.discard_current() {
                    log::warn!("🗑️  Discarded unfinished match {} after {} was rewritten", id, file.name);
                    report.discarded += 1;
                }
                self.assembler.begin_source(&file.name);
                self.dirty = true;
            }
            SourceEvent::Line(line) => {
                report.lines += 1;
                for done in self.assembler.feed_line(&line) {
                    self.accept(done, report);
                }
            }
        }
    }

    fn accept(&mut self, done: Match, report: &mut CycleReport) {
        log::info!(
            "🏆 Match {} complete: {} teams, winner {}",
            done.id,
            done.teams.len(),
            done.winner.as_deref().unwrap_or("none")
        );
        report.finalized += 1;
        self.session.push(done);
        self.dirty = true;
    }

    async fn check_force_end(&mut self, report: &mut CycleReport) {
        let Some(flag) = self.settings.force_end_flag.clone() else {
            return;
        };
        if tokio::fs::metadata(&flag).await.is_err() {
            return;
        }

        log::info!("🚩 Force-end flag {} found", flag.display());
        if let Err(e) = tokio::fs::remove_file(&flag).await {
            log::warn!("⚠️  Could not remove {}: {}", flag.display(), e);
        }
        match self.assembler.finalize_current(EndReason::ForcedEnd) {
            Some(done) => self.accept(done, report),
            None => log::info!("No match in progress to end"),
        }
    }

    fn check_inactivity(&mut self, report: &mut CycleReport) {
        let Some(timeout) = self.settings.inactivity_timeout else {
            return;
        };
        if report.lines > 0 || !self.assembler.is_active() || self.last_activity.elapsed() < timeout {
            return;
        }

        log::info!(
            "⏱️  No log activity for {}s, closing the running match",
            self.last_activity.elapsed().as_secs()
        );
        if let Some(done) = self.assembler.finalize_current(EndReason::StreamEnded) {
            self.accept(done, report);
        }
    }

    async fn publish(&mut self) -> bool {
        let archive: Arc<Vec<Match>> = self.archive.borrow().clone();
        let matches = merge_matches(&archive, &self.session);
        let ids: BTreeSet<MatchId> = matches.iter().map(|m| m.id.clone()).collect();
        if !self.publisher.needs_publish(&ids) {
            return false;
        }

        let latest = self.session.last().or_else(|| archive.last());
        let snapshot = SnapshotBuilder::new(&self.engine, &self.teams, self.settings.top_players)
            .build(&matches, latest, Utc::now());

        match self.publisher.publish(ids, &snapshot).await {
            Ok(published) => {
                if published {
                    log::info!(
                        "📤 Published standings: {} matches ({} archived, {} this session)",
                        snapshot.matches_counted,
                        archive.len(),
                        self.session.len()
                    );
                }
                published
            }
            Err(e) => {
                log::error!("❌ Snapshot publish failed, previous snapshot kept: {}", e);
                false
            }
        }
    }

    async fn save_checkpoint(&mut self) {
        let Some(store) = &self.checkpoint else {
            return;
        };
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            cursor: self.source.cursor().cloned(),
            file_cursors: self.source.file_cursors(),
            next_sequence: self.assembler.next_sequence(),
            current_source: self.assembler.source().map(str::to_string),
            in_progress: self.assembler.current().cloned(),
            last_finalized: self.assembler.last_finalized().cloned(),
            session_matches: self.session.clone(),
            saved_at: Utc::now().timestamp(),
        };
        match store.save(&checkpoint).await {
            Ok(()) => self.dirty = false,
            Err(e) => log::warn!("⚠️  Checkpoint save failed: {}", e),
        }
    }
}

/// Archive matches followed by session matches, each id counted once
fn merge_matches<'a>(archive: &'a [Match], session: &'a [Match]) -> Vec<&'a Match> {
    let mut seen = HashSet::new();
    archive
        .iter()
        .chain(session.iter())
        .filter(|m| m.is_finalized() && seen.insert(&m.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standings_core::{FileSnapshotSink, ScoringRules, TeamStyle};
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        live: PathBuf,
        output: PathBuf,
        archive_tx: watch::Sender<Arc<Vec<Match>>>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("live");
        std::fs::create_dir_all(&live).unwrap();
        let output = dir.path().join("live_scoreboard.json");
        let (archive_tx, _) = watch::channel(Arc::new(Vec::new()));
        Fixture {
            _dir: dir,
            live,
            output,
            archive_tx,
        }
    }

    fn build_loop(fx: &Fixture, settings: LoopSettings) -> AggregationLoop {
        let teams = TeamDirectory::new(TeamStyle {
            logo: "/assets/default-team-logo.jpg".to_string(),
            color: "#FFFFFF".to_string(),
        });
        AggregationLoop::new(
            settings,
            LiveLogSource::new(fx.live.clone(), vec!["txt".to_string()]),
            ScoringEngine::new(ScoringRules::default()),
            teams,
            SnapshotPublisher::new(Box::new(FileSnapshotSink::new(fx.output.clone()))),
            fx.archive_tx.subscribe(),
        )
    }

    fn settings() -> LoopSettings {
        LoopSettings {
            poll_interval: Duration::from_millis(10),
            inactivity_timeout: None,
            force_end_flag: None,
            top_players: 5,
        }
    }

    fn write(path: &Path, lines: &[&str]) {
        let mut text = lines.join("\n");
        text.push('\n');
        std::fs::write(path, text).unwrap();
    }

    fn read_output(path: &Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    const OPEN_MATCH: &[&str] = &[
        "MatchStart { map: 'Erangel' }",
        "PlayerRegistered { player: 'a1', team: 'Alpha' }",
        "PlayerRegistered { player: 'b1', team: 'Beta' }",
        "PlayerRegistered { player: 'c1', team: 'Gamma' }",
        "PlayerEliminated { victim: 'c1', killer: 'a1' }",
    ];

    #[tokio::test]
    async fn test_first_cycle_publishes_empty_snapshot() {
        let fx = fixture();
        let mut aggregation = build_loop(&fx, settings());

        let report = aggregation.run_cycle().await;
        assert!(report.published);
        assert_eq!(read_output(&fx.output)["matches_counted"], 0);

        let report = aggregation.run_cycle().await;
        assert!(!report.published);
    }

    #[tokio::test]
    async fn test_rotation_finalizes_and_starts_fresh() {
        let fx = fixture();
        let mut aggregation = build_loop(&fx, settings());

        write(&fx.live.join("game_01.txt"), OPEN_MATCH);
        let report = aggregation.run_cycle().await;
        assert_eq!(report.lines, OPEN_MATCH.len());
        assert_eq!(report.finalized, 0);

        write(
            &fx.live.join("game_02.txt"),
            &["MatchStart { map: 'Miramar' }", "PlayerRegistered { player: 'a1', team: 'Alpha' }"],
        );
        let report = aggregation.run_cycle().await;
        assert_eq!(report.finalized, 1);
        assert!(report.published);

        let finished = &aggregation.session_matches()[0];
        assert_eq!(finished.end_reason, Some(EndReason::Rotated));
        assert_eq!(finished.team("Gamma").unwrap().placement, Some(3));
        assert_eq!(finished.team("Alpha").unwrap().placement, Some(1));
        assert_eq!(finished.team("Beta").unwrap().placement, Some(2));

        let current = aggregation.assembler().current().unwrap();
        assert_eq!(current.id.source, "game_02.txt");
        assert_eq!(current.map.as_deref(), Some("Miramar"));
        assert_eq!(current.teams.len(), 1);

        let json = read_output(&fx.output);
        assert_eq!(json["matches_counted"], 1);
        assert_eq!(json["overall_standings"][0]["team"], "Alpha");
    }

    #[tokio::test]
    async fn test_truncation_discards_open_match() {
        let fx = fixture();
        let mut aggregation = build_loop(&fx, settings());
        let path = fx.live.join("game.txt");

        write(&path, OPEN_MATCH);
        aggregation.run_cycle().await;

        write(&path, &["MatchStart { map: 'Sanhok' }"]);
        let report = aggregation.run_cycle().await;
        assert_eq!(report.discarded, 1);
        assert!(aggregation.session_matches().is_empty());
        assert_eq!(
            aggregation.assembler().current().unwrap().map.as_deref(),
            Some("Sanhok")
        );
    }

    #[tokio::test]
    async fn test_force_end_flag_and_inactivity() {
        let fx = fixture();
        let flag = fx.live.join("force_end.flag");
        let mut aggregation = build_loop(
            &fx,
            LoopSettings {
                force_end_flag: Some(flag.clone()),
                inactivity_timeout: Some(Duration::ZERO),
                ..settings()
            },
        );
        let path = fx.live.join("game.txt");

        write(&path, OPEN_MATCH);
        let report = aggregation.run_cycle().await;
        assert_eq!(report.finalized, 0);

        std::fs::write(&flag, "").unwrap();
        let report = aggregation.run_cycle().await;
        assert_eq!(report.finalized, 1);
        assert!(!flag.exists());
        assert_eq!(
            aggregation.session_matches()[0].end_reason,
            Some(EndReason::ForcedEnd)
        );

        // A new match in the same file, then silence
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(b"MatchStart { map: 'Vikendi' }\nPlayerRegistered { player: 'x', team: 'X' }\n")
            })
            .unwrap();
        aggregation.run_cycle().await;
        let report = aggregation.run_cycle().await;
        assert_eq!(report.finalized, 1);
        assert_eq!(
            aggregation.session_matches()[1].end_reason,
            Some(EndReason::StreamEnded)
        );
    }

    #[tokio::test]
    async fn test_archive_matches_are_merged() {
        let fx = fixture();
        let mut aggregation = build_loop(&fx, settings());

        let mut archived = Match::new(MatchId::new("archive/day1.txt", 1));
        let mut team = crate::standings_core::Team::new("Omega", None);
        team.placement = Some(1);
        archived.teams.push(team);
        archived.status = crate::standings_core::MatchStatus::Finalized;
        fx.archive_tx.send(Arc::new(vec![archived])).unwrap();

        let report = aggregation.run_cycle().await;
        assert!(report.published);
        let json = read_output(&fx.output);
        assert_eq!(json["matches_counted"], 1);
        assert_eq!(json["latest_match"]["source"], "archive/day1.txt");
        assert_eq!(json["overall_standings"][0]["points"], 10);
    }

    #[tokio::test]
    async fn test_run_stops_and_saves_checkpoint() {
        let fx = fixture();
        let checkpoint_path = fx.live.join("checkpoint.json");
        let aggregation = build_loop(&fx, settings())
            .with_checkpoint_store(CheckpointStore::new(checkpoint_path.clone()));
        write(&fx.live.join("game.txt"), OPEN_MATCH);

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(aggregation.run(stop_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
        let stopped = handle.await.unwrap();

        assert!(stopped.assembler().current().is_some());
        let saved = CheckpointStore::new(checkpoint_path).load().unwrap().unwrap();
        assert_eq!(saved.in_progress.unwrap().teams.len(), 3);
        assert!(saved.cursor.unwrap().offset > 0);
    }
}
