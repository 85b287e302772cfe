//! Published standings document
//!
//! A [`Snapshot`] is always built from one immutable set of finalized
//! matches, so a single document never mixes two views of the tournament.

use super::model::{EndReason, Match};
use super::scorer::{AggregateRow, PlayerRow, ScoringEngine, StandingsRow};
use super::teams::TeamDirectory;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub matches_counted: usize,
    pub match_ids: Vec<String>,
    pub latest_match: Option<MatchSummary>,
    pub match_standings: Vec<StandingsEntry>,
    pub overall_standings: Vec<AggregateEntry>,
    pub top_players: TopPlayers,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchSummary {
    pub id: String,
    pub source: String,
    pub game_id: Option<String>,
    pub map: Option<String>,
    pub started_at: Option<NaiveDateTime>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
    pub winner: Option<String>,
    pub elimination_order: Vec<String>,
    pub team_count: usize,
    pub player_count: usize,
}

impl MatchSummary {
    fn of(m: &Match) -> Self {
        Self {
            id: m.id.to_string(),
            source: m.id.source.clone(),
            game_id: m.id.game_id.clone(),
            map: m.map.clone(),
            started_at: m.id.started_at,
            finalized_at: m.finalized_at,
            end_reason: m.end_reason,
            winner: m.winner.clone(),
            elimination_order: m.elimination_order.clone(),
            team_count: m.teams.len(),
            player_count: m.player_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StandingsEntry {
    #[serde(flatten)]
    pub row: StandingsRow,
    pub logo: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateEntry {
    #[serde(flatten)]
    pub row: AggregateRow,
    pub logo: String,
    pub color: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TopPlayers {
    pub latest_match: Vec<PlayerRow>,
    pub overall: Vec<PlayerRow>,
}

pub struct SnapshotBuilder<'a> {
    engine: &'a ScoringEngine,
    teams: &'a TeamDirectory,
    top_players: usize,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(engine: &'a ScoringEngine, teams: &'a TeamDirectory, top_players: usize) -> Self {
        Self {
            engine,
            teams,
            top_players,
        }
    }

    /// `latest` is the match shown in detail; it should be one of `matches`
    pub fn build(
        &self,
        matches: &[&Match],
        latest: Option<&Match>,
        generated_at: DateTime<Utc>,
    ) -> Snapshot {
        let mut ids: Vec<_> = matches.iter().map(|m| &m.id).collect();
        ids.sort();

        // Team numbers from the feed help find styles for teams named "Team 3"
        let mut team_numbers: HashMap<&str, &str> = HashMap::new();
        for m in matches {
            for team in &m.teams {
                if let Some(number) = team.team_id.as_deref() {
                    team_numbers.insert(team.name.as_str(), number);
                }
            }
        }

        let match_standings = latest
            .map(|m| {
                self.engine
                    .match_standings(m)
                    .into_iter()
                    .map(|row| {
                        let number = m.team(&row.team).and_then(|t| t.team_id.as_deref());
                        let style = self.teams.lookup(&row.team, number);
                        StandingsEntry {
                            logo: style.logo.clone(),
                            color: style.color.clone(),
                            row,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let overall_standings = self
            .engine
            .aggregate(matches)
            .into_iter()
            .map(|row| {
                let number = team_numbers.get(row.team.as_str()).copied();
                let style = self.teams.lookup(&row.team, number);
                AggregateEntry {
                    logo: style.logo.clone(),
                    color: style.color.clone(),
                    row,
                }
            })
            .collect();

        let top_players = TopPlayers {
            latest_match: latest
                .map(|m| self.engine.top_players(&[m], self.top_players))
                .unwrap_or_default(),
            overall: self.engine.top_players(matches, self.top_players),
        };

        Snapshot {
            generated_at,
            matches_counted: matches.iter().filter(|m| m.is_finalized()).count(),
            match_ids: ids.into_iter().map(|id| id.to_string()).collect(),
            latest_match: latest.map(MatchSummary::of),
            match_standings,
            overall_standings,
            top_players,
        }
    }
}
