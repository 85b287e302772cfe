//! Placement + kill scoring, cumulative standings and player leaderboards
//!
//! Every function here is a pure recomputation over finalized matches. Input
//! order never matters: matches are put in `MatchId` order first and all
//! comparisons are exact integer comparisons.

use super::model::Match;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringRules {
    /// Points for placement 1, 2, ...; placements beyond the table score 0
    pub placement_points: Vec<u32>,
    pub kill_points: u32,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            placement_points: vec![10, 6, 5, 4, 3, 2, 1, 1],
            kill_points: 1,
        }
    }
}

impl ScoringRules {
    pub fn placement_points_for(&self, placement: u32) -> u32 {
        if placement == 0 {
            return 0;
        }
        self.placement_points
            .get(placement as usize - 1)
            .copied()
            .unwrap_or(0)
    }
}

/// One team's result in one match
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StandingsRow {
    pub team: String,
    pub placement: u32,
    pub kills: u32,
    pub placement_points: u32,
    pub kill_points: u32,
    pub total_points: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub rank: usize,
    pub team: String,
    pub matches_played: u32,
    pub placement_points: u32,
    pub kill_points: u32,
    pub points: u32,
    pub kills: u32,
    pub average_placement: f64,
    pub wwcd: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerRow {
    pub player_id: String,
    pub name: String,
    pub team: String,
    pub kills: u32,
    pub damage: u32,
    pub knockouts: u32,
    pub matches: u32,
}

#[derive(Default)]
struct TeamTally {
    team: String,
    matches: u32,
    placement_sum: u32,
    placement_points: u32,
    kill_points: u32,
    kills: u32,
    wwcd: u32,
}

impl TeamTally {
    fn points(&self) -> u32 {
        self.placement_points + self.kill_points
    }

    /// Lower average placement first, compared without division
    fn cmp_average_placement(&self, other: &Self) -> Ordering {
        let lhs = self.placement_sum as u64 * other.matches as u64;
        let rhs = other.placement_sum as u64 * self.matches as u64;
        lhs.cmp(&rhs)
    }
}

pub struct ScoringEngine {
    rules: ScoringRules,
}

impl ScoringEngine {
    pub fn new(rules: ScoringRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ScoringRules {
        &self.rules
    }

    /// Standings of a single match, best placement first.
    /// Teams without a placement (match still running) sort last.
    pub fn match_standings(&self, m: &Match) -> Vec<StandingsRow> {
        let mut rows: Vec<StandingsRow> = m
            .teams
            .iter()
            .map(|team| {
                let placement = team.placement.unwrap_or(0);
                let kills = team.kills();
                let placement_points = self.rules.placement_points_for(placement);
                let kill_points = kills * self.rules.kill_points;
                StandingsRow {
                    team: team.name.clone(),
                    placement,
                    kills,
                    placement_points,
                    kill_points,
                    total_points: placement_points + kill_points,
                }
            })
            .collect();
        rows.sort_by_key(|row| if row.placement == 0 { u32::MAX } else { row.placement });
        rows
    }

    /// Cumulative standings across finalized matches
    pub fn aggregate(&self, matches: &[&Match]) -> Vec<AggregateRow> {
        let mut tallies: Vec<TeamTally> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for m in canonical_order(matches) {
            for team in &m.teams {
                let Some(placement) = team.placement else {
                    continue;
                };
                let slot = *index.entry(team.name.clone()).or_insert_with(|| {
                    tallies.push(TeamTally {
                        team: team.name.clone(),
                        ..TeamTally::default()
                    });
                    tallies.len() - 1
                });

                let kills = team.kills();
                let tally = &mut tallies[slot];
                tally.matches += 1;
                tally.placement_sum += placement;
                tally.placement_points += self.rules.placement_points_for(placement);
                tally.kill_points += kills * self.rules.kill_points;
                tally.kills += kills;
                if placement == 1 {
                    tally.wwcd += 1;
                }
            }
        }

        let mut order: Vec<usize> = (0..tallies.len()).collect();
        order.sort_by(|&a, &b| {
            let (x, y) = (&tallies[a], &tallies[b]);
            y.points()
                .cmp(&x.points())
                .then(y.kills.cmp(&x.kills))
                .then_with(|| x.cmp_average_placement(y))
                .then(a.cmp(&b))
        });

        order
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                let tally = &tallies[slot];
                AggregateRow {
                    rank: position + 1,
                    team: tally.team.clone(),
                    matches_played: tally.matches,
                    placement_points: tally.placement_points,
                    kill_points: tally.kill_points,
                    points: tally.points(),
                    kills: tally.kills,
                    average_placement: tally.placement_sum as f64 / tally.matches as f64,
                    wwcd: tally.wwcd,
                }
            })
            .collect()
    }

    /// Best fraggers across the given finalized matches
    pub fn top_players(&self, matches: &[&Match], limit: usize) -> Vec<PlayerRow> {
        let mut rows: Vec<PlayerRow> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for m in canonical_order(matches) {
            for team in &m.teams {
                for player in &team.players {
                    let slot = *index.entry(player.id.clone()).or_insert_with(|| {
                        rows.push(PlayerRow {
                            player_id: player.id.clone(),
                            name: player.name.clone(),
                            team: team.name.clone(),
                            kills: 0,
                            damage: 0,
                            knockouts: 0,
                            matches: 0,
                        });
                        rows.len() - 1
                    });

                    let row = &mut rows[slot];
                    row.name = player.name.clone();
                    row.team = team.name.clone();
                    row.kills += player.kills;
                    row.damage += player.damage;
                    row.knockouts += player.knockouts;
                    row.matches += 1;
                }
            }
        }

        let mut order: Vec<usize> = (0..rows.len()).collect();
        order.sort_by(|&a, &b| {
            let (x, y) = (&rows[a], &rows[b]);
            y.kills
                .cmp(&x.kills)
                .then(y.damage.cmp(&x.damage))
                .then(y.knockouts.cmp(&x.knockouts))
                .then(a.cmp(&b))
        });
        order
            .into_iter()
            .take(limit)
            .map(|slot| rows[slot].clone())
            .collect()
    }
}

fn canonical_order<'a>(matches: &[&'a Match]) -> Vec<&'a Match> {
    let mut ordered: Vec<&Match> = matches.iter().copied().filter(|m| m.is_finalized()).collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standings_core::model::{MatchId, MatchStatus, Player, Team};

    fn team(name: &str, placement: u32, kills: &[u32]) -> Team {
        let mut team = Team::new(name, None);
        team.placement = Some(placement);
        for (i, k) in kills.iter().enumerate() {
            let mut player = Player::new(format!("{}{}", name, i), format!("{}{}", name, i), name);
            player.kills = *k;
            team.players.push(player);
        }
        team
    }

    fn finalized(sequence: u32, teams: Vec<Team>) -> Match {
        let mut m = Match::new(MatchId::new("test.txt", sequence));
        m.teams = teams;
        m.status = MatchStatus::Finalized;
        m
    }

    #[test]
    fn test_single_match_standings() {
        let engine = ScoringEngine::new(ScoringRules {
            placement_points: vec![10, 6],
            kill_points: 1,
        });
        let m = finalized(1, vec![team("B", 2, &[5]), team("A", 1, &[2, 1])]);

        let rows = engine.match_standings(&m);
        assert_eq!(
            rows,
            vec![
                StandingsRow {
                    team: "A".to_string(),
                    placement: 1,
                    kills: 3,
                    placement_points: 10,
                    kill_points: 3,
                    total_points: 13,
                },
                StandingsRow {
                    team: "B".to_string(),
                    placement: 2,
                    kills: 5,
                    placement_points: 6,
                    kill_points: 5,
                    total_points: 11,
                },
            ]
        );

        let aggregate = engine.aggregate(&[&m]);
        assert_eq!(aggregate[0].team, "A");
        assert_eq!(aggregate[0].points, 13);
        assert_eq!(aggregate[0].wwcd, 1);
        assert_eq!(aggregate[1].team, "B");
        assert_eq!(aggregate[1].rank, 2);
    }

    #[test]
    fn test_placement_beyond_table_scores_zero() {
        let rules = ScoringRules::default();
        assert_eq!(rules.placement_points_for(1), 10);
        assert_eq!(rules.placement_points_for(8), 1);
        assert_eq!(rules.placement_points_for(9), 0);
        assert_eq!(rules.placement_points_for(0), 0);
    }

    #[test]
    fn test_aggregate_ignores_input_order() {
        let engine = ScoringEngine::new(ScoringRules::default());
        let m1 = finalized(1, vec![team("A", 1, &[0]), team("B", 2, &[4]), team("C", 3, &[0])]);
        let m2 = finalized(2, vec![team("C", 1, &[0]), team("A", 2, &[4]), team("B", 3, &[0])]);

        let forward = engine.aggregate(&[&m1, &m2]);
        let backward = engine.aggregate(&[&m2, &m1]);
        assert_eq!(
            serde_json::to_string(&forward).unwrap(),
            serde_json::to_string(&backward).unwrap()
        );
    }

    #[test]
    fn test_tie_breaks_kills_then_average_placement() {
        let engine = ScoringEngine::new(ScoringRules {
            placement_points: vec![10, 6, 5],
            kill_points: 1,
        });
        // X: 10 + 1 = 11 pts, 1 kill. Y: 6 + 5 = 11 pts, 5 kills
        let m1 = finalized(1, vec![team("X", 1, &[1]), team("Y", 2, &[5]), team("Z", 3, &[0])]);
        let rows = engine.aggregate(&[&m1]);
        assert_eq!(rows[0].team, "Y");
        assert_eq!(rows[1].team, "X");

        // P and Q level on points and kills, P has the better average
        let engine = ScoringEngine::new(ScoringRules {
            placement_points: vec![10, 6, 4],
            kill_points: 1,
        });
        let m2 = finalized(2, vec![team("P", 1, &[0]), team("Q", 2, &[0]), team("R", 3, &[0])]);
        let m3 = finalized(3, vec![team("R", 1, &[0]), team("S", 2, &[0]), team("Q", 3, &[0])]);
        let rows = engine.aggregate(&[&m3, &m2]);
        let p = rows.iter().position(|r| r.team == "P").unwrap();
        let q = rows.iter().position(|r| r.team == "Q").unwrap();
        assert_eq!(rows[p].points, 10);
        assert_eq!(rows[q].points, 10);
        assert_eq!(rows[p].average_placement, 1.0);
        assert_eq!(rows[q].average_placement, 2.5);
        assert!(p < q);
        assert_eq!(rows[0].team, "R");
    }

    #[test]
    fn test_more_matches_never_lower_totals() {
        let engine = ScoringEngine::new(ScoringRules::default());
        let m1 = finalized(1, vec![team("A", 1, &[3]), team("B", 2, &[1])]);
        let m2 = finalized(2, vec![team("B", 1, &[2]), team("A", 2, &[0])]);

        let before = engine.aggregate(&[&m1]);
        let after = engine.aggregate(&[&m1, &m2]);
        for row in &before {
            let later = after.iter().find(|r| r.team == row.team).unwrap();
            assert!(later.points >= row.points);
            assert!(later.kills >= row.kills);
        }
    }

    #[test]
    fn test_unfinalized_matches_are_skipped() {
        let engine = ScoringEngine::new(ScoringRules::default());
        let mut running = finalized(1, vec![team("A", 1, &[9])]);
        running.status = MatchStatus::InProgress;
        assert!(engine.aggregate(&[&running]).is_empty());
        assert!(engine.top_players(&[&running], 5).is_empty());
    }

    #[test]
    fn test_top_players_sum_across_matches() {
        let engine = ScoringEngine::new(ScoringRules::default());
        let m1 = finalized(1, vec![team("A", 1, &[3, 1]), team("B", 2, &[2])]);
        let m2 = finalized(2, vec![team("A", 2, &[0, 0]), team("B", 1, &[2])]);

        let top = engine.top_players(&[&m2, &m1], 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].player_id, "B0");
        assert_eq!(top[0].kills, 4);
        assert_eq!(top[0].matches, 2);
        assert_eq!(top[1].player_id, "A0");
    }
}
