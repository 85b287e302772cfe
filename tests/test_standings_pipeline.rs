//! End-to-end tests: log files on disk through to the published snapshot
//!
//! Each test drives `AggregationLoop::run_cycle` by hand against a temporary
//! live directory and reads back the JSON document a scoreboard would read.

#[cfg(test)]
mod standings_pipeline_tests {
    use matchboard::aggregator::{AggregationLoop, LoopSettings};
    use matchboard::persistence::CheckpointStore;
    use matchboard::standings_core::{
        EndReason, FileSnapshotSink, LiveLogSource, Match, ScoringEngine, ScoringRules,
        SnapshotPublisher, TeamDirectory, TeamStyle,
    };
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};
    use tokio::sync::watch;

    struct Workspace {
        _dir: tempfile::TempDir,
        live: PathBuf,
        output: PathBuf,
        checkpoint: PathBuf,
        _archive: watch::Sender<Arc<Vec<Match>>>,
        archive_rx: watch::Receiver<Arc<Vec<Match>>>,
    }

    impl Workspace {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let live = dir.path().join("live");
            std::fs::create_dir_all(&live).unwrap();
            let (tx, rx) = watch::channel(Arc::new(Vec::new()));
            Self {
                output: dir.path().join("live_scoreboard.json"),
                checkpoint: dir.path().join("checkpoint.json"),
                live,
                _dir: dir,
                _archive: tx,
                archive_rx: rx,
            }
        }

        fn aggregation(&self) -> AggregationLoop {
            let teams = TeamDirectory::from_ini_str(
                "TeamLogoAndColor=(TeamNo=1,TeamName=Alpha,TeamLogoPath=logos/alpha.png,TeamColor=#FF0000)\n",
                "/assets/LOGO/",
                TeamStyle {
                    logo: "/assets/default-team-logo.jpg".to_string(),
                    color: "#FFFFFF".to_string(),
                },
            );
            AggregationLoop::new(
                LoopSettings {
                    poll_interval: Duration::from_millis(10),
                    inactivity_timeout: None,
                    force_end_flag: None,
                    top_players: 3,
                },
                LiveLogSource::new(self.live.clone(), vec!["txt".to_string()]),
                ScoringEngine::new(ScoringRules {
                    placement_points: vec![10, 6],
                    kill_points: 1,
                }),
                teams,
                SnapshotPublisher::new(Box::new(FileSnapshotSink::new(self.output.clone()))),
                self.archive_rx.clone(),
            )
            .with_checkpoint_store(CheckpointStore::new(self.checkpoint.clone()))
        }

        fn append(&self, file: &str, lines: &[String]) {
            let mut f = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.live.join(file))
                .unwrap();
            for line in lines {
                writeln!(f, "{}", line).unwrap();
            }
        }

        fn snapshot(&self) -> serde_json::Value {
            read_json(&self.output)
        }

        fn restored_aggregation(&self) -> AggregationLoop {
            let mut aggregation = self.aggregation();
            let checkpoint = CheckpointStore::new(self.checkpoint.clone())
                .load()
                .unwrap()
                .unwrap();
            aggregation.restore(checkpoint);
            aggregation
        }

        /// Push a file's mtime ahead of now so it becomes the newest log
        fn touch_ahead(&self, file: &str, secs: u64) {
            let f = std::fs::OpenOptions::new()
                .write(true)
                .open(self.live.join(file))
                .unwrap();
            f.set_modified(SystemTime::now() + Duration::from_secs(secs))
                .unwrap();
        }
    }

    fn feed_game_100() -> Vec<String> {
        vec![
            "GameID: '100'".to_string(),
            "{ uId: 1, teamId: 1, teamName: 'Alpha', liveState: 0 }".to_string(),
            "{ uId: 2, teamId: 2, teamName: 'Beta', liveState: 5 }".to_string(),
        ]
    }

    fn full_match() -> Vec<String> {
        let mut lines = alpha_beta_opening();
        lines.extend(alpha_beta_closing());
        lines
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    /// Alpha (6 players) wins with 3 kills, Beta (4 players) finishes second with 5
    fn alpha_beta_opening() -> Vec<String> {
        let mut lines = vec!["[2024-05-01 20:00:00] MatchStart { map: 'Erangel' }".to_string()];
        for i in 1..=6 {
            lines.push(format!("PlayerRegistered {{ player: 'a{}', team: 'Alpha' }}", i));
        }
        for i in 1..=4 {
            lines.push(format!("PlayerRegistered {{ player: 'b{}', team: 'Beta' }}", i));
        }
        for i in 2..=6 {
            lines.push(format!("PlayerEliminated {{ victim: 'a{}', killer: 'b1' }}", i));
        }
        lines
    }

    fn alpha_beta_closing() -> Vec<String> {
        let mut lines: Vec<String> = (2..=4)
            .map(|i| format!("PlayerEliminated {{ victim: 'b{}', killer: 'a1' }}", i))
            .collect();
        lines.push("MatchEnd { winner: 'Alpha' }".to_string());
        lines
    }

    #[tokio::test]
    async fn test_two_team_match_standings() {
        let ws = Workspace::new();
        let mut aggregation = ws.aggregation();

        let mut lines = alpha_beta_opening();
        lines.extend(alpha_beta_closing());
        ws.append("match_01.txt", &lines);

        let report = aggregation.run_cycle().await;
        assert_eq!(report.finalized, 1);
        assert!(report.published);

        let json = ws.snapshot();
        assert_eq!(json["matches_counted"], 1);
        assert_eq!(json["latest_match"]["winner"], "Alpha");
        assert_eq!(json["latest_match"]["end_reason"], "match_end");

        let standings = &json["match_standings"];
        assert_eq!(standings[0]["team"], "Alpha");
        assert_eq!(standings[0]["placement"], 1);
        assert_eq!(standings[0]["kills"], 3);
        assert_eq!(standings[0]["total_points"], 13);
        assert_eq!(standings[0]["color"], "#FF0000");
        assert_eq!(standings[1]["team"], "Beta");
        assert_eq!(standings[1]["placement"], 2);
        assert_eq!(standings[1]["kills"], 5);
        assert_eq!(standings[1]["total_points"], 11);
        assert_eq!(standings[1]["logo"], "/assets/default-team-logo.jpg");

        let overall = &json["overall_standings"];
        assert_eq!(overall[0]["team"], "Alpha");
        assert_eq!(overall[0]["points"], 13);
        assert_eq!(overall[0]["wwcd"], 1);
        assert_eq!(overall[1]["team"], "Beta");

        assert_eq!(json["top_players"]["overall"][0]["player_id"], "b1");
        assert_eq!(json["top_players"]["overall"][0]["kills"], 5);

        // Nothing new: the document is left alone
        let report = aggregation.run_cycle().await;
        assert!(!report.published);
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_stop_the_match() {
        let ws = Workspace::new();
        let mut aggregation = ws.aggregation();

        let mut lines = alpha_beta_opening();
        lines.push("PlayerEliminated { killer: 'a1' }".to_string());
        lines.extend(alpha_beta_closing());
        ws.append("match_01.txt", &lines);

        aggregation.run_cycle().await;
        assert_eq!(aggregation.assembler().stats().malformed, 1);

        let finished = &aggregation.session_matches()[0];
        assert_eq!(finished.malformed_lines, 1);
        assert_eq!(finished.team("Alpha").unwrap().kills(), 3);
        assert_eq!(finished.team("Beta").unwrap().kills(), 5);
    }

    #[tokio::test]
    async fn test_rotation_mid_match() {
        let ws = Workspace::new();
        let mut aggregation = ws.aggregation();

        ws.append("match_01.txt", &alpha_beta_opening());
        aggregation.run_cycle().await;
        assert!(aggregation.session_matches().is_empty());

        ws.append(
            "match_02.txt",
            &["MatchStart { map: 'Miramar' }".to_string()],
        );
        let report = aggregation.run_cycle().await;
        assert_eq!(report.finalized, 1);

        let rotated = &aggregation.session_matches()[0];
        assert_eq!(rotated.end_reason, Some(EndReason::Rotated));
        assert_eq!(rotated.team("Beta").unwrap().placement, Some(1));
        assert_eq!(rotated.team("Alpha").unwrap().placement, Some(2));

        let current = aggregation.assembler().current().unwrap();
        assert_eq!(current.id.source, "match_02.txt");
        assert!(current.teams.is_empty());

        let json = ws.snapshot();
        assert_eq!(json["latest_match"]["source"], "match_01.txt");
        assert_eq!(json["overall_standings"][0]["team"], "Beta");
    }

    #[tokio::test]
    async fn test_restart_resumes_from_checkpoint() {
        let ws = Workspace::new();

        {
            let mut first = ws.aggregation();
            ws.append("match_01.txt", &alpha_beta_opening());
            first.run_cycle().await;
            assert!(first.assembler().current().is_some());
        }

        let mut second = ws.aggregation();
        let checkpoint = CheckpointStore::new(ws.checkpoint.clone())
            .load()
            .unwrap()
            .unwrap();
        second.restore(checkpoint);

        ws.append("match_01.txt", &alpha_beta_closing());
        let report = second.run_cycle().await;
        assert_eq!(report.lines, alpha_beta_closing().len());
        assert_eq!(report.finalized, 1);

        let finished = &second.session_matches()[0];
        assert_eq!(finished.id.sequence, 1);
        assert_eq!(finished.winner.as_deref(), Some("Alpha"));
        assert_eq!(finished.team("Alpha").unwrap().kills(), 3);
        assert_eq!(finished.team("Beta").unwrap().kills(), 5);
        assert_eq!(finished.player_count(), 10);
    }

    #[tokio::test]
    async fn test_session_matches_accumulate() {
        let ws = Workspace::new();
        let mut aggregation = ws.aggregation();

        let mut lines = alpha_beta_opening();
        lines.extend(alpha_beta_closing());
        ws.append("match_01.txt", &lines);
        aggregation.run_cycle().await;

        // Second game in the same file, Beta wins outright
        let second = vec![
            "MatchStart { map: 'Sanhok' }".to_string(),
            "PlayerRegistered { player: 'a1', team: 'Alpha' }".to_string(),
            "PlayerRegistered { player: 'b1', team: 'Beta' }".to_string(),
            "PlayerEliminated { victim: 'a1', killer: 'b1' }".to_string(),
        ];
        ws.append("match_01.txt", &second);
        let report = aggregation.run_cycle().await;
        assert_eq!(report.finalized, 1);
        assert!(report.published);

        let json = ws.snapshot();
        assert_eq!(json["matches_counted"], 2);
        assert_eq!(json["latest_match"]["map"], "Sanhok");
        assert_eq!(json["latest_match"]["end_reason"], "last_team_standing");

        // Alpha 13 + 6, Beta 11 + 11
        let overall = &json["overall_standings"];
        assert_eq!(overall[0]["team"], "Beta");
        assert_eq!(overall[0]["points"], 22);
        assert_eq!(overall[1]["team"], "Alpha");
        assert_eq!(overall[1]["points"], 19);
    }

    #[tokio::test]
    async fn test_reactivated_older_log_is_not_counted_twice() {
        let ws = Workspace::new();
        let mut aggregation = ws.aggregation();

        ws.append("a.txt", &full_match());
        aggregation.run_cycle().await;
        assert_eq!(aggregation.session_matches().len(), 1);

        ws.append("b.txt", &["MatchStart { map: 'Miramar' }".to_string()]);
        ws.touch_ahead("b.txt", 2);
        aggregation.run_cycle().await;
        assert_eq!(aggregation.assembler().source(), Some("b.txt"));

        // An operator tool touches the old log and it becomes newest again
        ws.append("a.txt", &[String::new()]);
        ws.touch_ahead("a.txt", 5);
        let report = aggregation.run_cycle().await;
        assert_eq!(report.lines, 0);
        assert_eq!(aggregation.assembler().source(), Some("a.txt"));

        assert_eq!(aggregation.session_matches().len(), 1);
        let json = ws.snapshot();
        assert_eq!(json["matches_counted"], 1);
        assert_eq!(json["overall_standings"][0]["matches_played"], 1);
    }

    #[tokio::test]
    async fn test_restart_after_finalized_game_keeps_it_closed() {
        let ws = Workspace::new();

        {
            let mut first = ws.aggregation();
            ws.append("game.txt", &feed_game_100());
            let report = first.run_cycle().await;
            assert_eq!(report.finalized, 1);
        }

        // The observer re-sends the same game after the restart
        ws.append("game.txt", &feed_game_100());
        let mut second = ws.restored_aggregation();
        let report = second.run_cycle().await;
        assert_eq!(report.finalized, 0);

        assert_eq!(second.session_matches().len(), 1);
        assert!(second.assembler().current().is_none());
        assert_eq!(ws.snapshot()["matches_counted"], 1);
    }

    #[tokio::test]
    async fn test_earlier_live_logs_are_counted_once_at_startup() {
        let ws = Workspace::new();
        ws.append("match_01.txt", &full_match());
        ws.append("match_02.txt", &alpha_beta_opening());
        ws.touch_ahead("match_02.txt", 2);

        let mut aggregation = ws.aggregation();
        assert_eq!(aggregation.replay_live_backlog().await, 1);
        assert_eq!(aggregation.replay_live_backlog().await, 0);

        let report = aggregation.run_cycle().await;
        assert_eq!(report.lines, alpha_beta_opening().len());
        assert!(report.published);

        let earlier = &aggregation.session_matches()[0];
        assert_eq!(earlier.id.source, "match_01.txt");
        assert_eq!(earlier.id.sequence, 1);
        assert_eq!(earlier.winner.as_deref(), Some("Alpha"));
        assert_eq!(aggregation.assembler().current().unwrap().id.sequence, 2);
        assert_eq!(ws.snapshot()["matches_counted"], 1);

        // After a restart the earlier log is known and not replayed again
        let mut restarted = ws.restored_aggregation();
        assert_eq!(restarted.replay_live_backlog().await, 0);
        assert_eq!(restarted.session_matches().len(), 1);
    }
}
