//! Per-match state machine
//!
//! A tracker owns one [`Match`] from its first event until finalization.
//! Placements are handed out as the largest unused number in `1..=N` at the
//! moment a team is knocked out, so the roster always ends as a permutation
//! even when teams join late. Once finalized the tracker only rejects.

use super::model::{
    EndReason, LogEvent, Match, MatchId, MatchStatus, Player, PlayerState, PlayerStatus, Team,
    TeamStatus, TimedEvent, UNKNOWN_TEAM,
};
use chrono::{NaiveDateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerPhase {
    Empty,
    Active,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// The event was applied and closed the match
    Finalized,
    Rejected(Rejection),
}

/// An event that arrived in an order the tracker cannot honor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    AlreadyFinalized,
    NotStarted,
    DifferentMatch {
        current: Option<String>,
        incoming: Option<String>,
    },
    TeamConflict {
        player: String,
        registered: String,
        requested: String,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::AlreadyFinalized => write!(f, "match already finalized"),
            Rejection::NotStarted => write!(f, "match has not started"),
            Rejection::DifferentMatch { current, incoming } => write!(
                f,
                "start of game {} while game {} is running",
                incoming.as_deref().unwrap_or("?"),
                current.as_deref().unwrap_or("?")
            ),
            Rejection::TeamConflict {
                player,
                registered,
                requested,
            } => write!(
                f,
                "player {} already plays for {}, not {}",
                player, registered, requested
            ),
        }
    }
}

impl std::error::Error for Rejection {}

enum Step {
    Continue,
    End(Option<String>),
}

pub struct MatchTracker {
    current: Match,
    phase: TrackerPhase,
    /// Observer feed team number -> team name
    team_names: HashMap<String, String>,
    rejected: u64,
}

impl MatchTracker {
    pub fn new(id: MatchId) -> Self {
        Self {
            current: Match::new(id),
            phase: TrackerPhase::Empty,
            team_names: HashMap::new(),
            rejected: 0,
        }
    }

    /// Rebuild a tracker around a match restored from a checkpoint
    pub fn resume(current: Match) -> Self {
        let phase = if current.is_finalized() {
            TrackerPhase::Finalized
        } else if current.events.is_empty() {
            TrackerPhase::Empty
        } else {
            TrackerPhase::Active
        };
        let team_names = current
            .teams
            .iter()
            .filter_map(|t| t.team_id.clone().map(|id| (id, t.name.clone())))
            .collect();

        Self {
            current,
            phase,
            team_names,
            rejected: 0,
        }
    }

    /// Stand-in for a match that was already finalized and handed out
    pub fn closed(id: MatchId) -> Self {
        let mut current = Match::new(id);
        current.status = MatchStatus::Finalized;
        Self::resume(current)
    }

    pub fn phase(&self) -> TrackerPhase {
        self.phase
    }

    pub fn current(&self) -> &Match {
        &self.current
    }

    pub fn into_match(self) -> Match {
        self.current
    }

    pub fn rejected_events(&self) -> u64 {
        self.rejected
    }

    pub fn note_malformed(&mut self) {
        if self.phase != TrackerPhase::Finalized {
            self.current.malformed_lines += 1;
        }
    }

    /// Whether `event` opens a match other than the one held here
    pub fn starts_new_match(&self, event: &LogEvent) -> bool {
        let LogEvent::MatchStart { game_id, map } = event else {
            return false;
        };
        match self.phase {
            TrackerPhase::Empty => false,
            TrackerPhase::Active => self.conflicts_with(game_id, map),
            TrackerPhase::Finalized => game_id.is_none() || *game_id != self.current.id.game_id,
        }
    }

    fn conflicts_with(&self, game_id: &Option<String>, map: &Option<String>) -> bool {
        match (&self.current.id.game_id, game_id) {
            (Some(current), Some(incoming)) => current != incoming,
            (_, None) => map.is_some() && self.current.map.is_some(),
            (None, Some(_)) => false,
        }
    }

    pub fn apply(&mut self, event: TimedEvent) -> Outcome {
        if self.phase == TrackerPhase::Finalized {
            self.rejected += 1;
            return Outcome::Rejected(Rejection::AlreadyFinalized);
        }

        let step = match self.dispatch(event.at, &event.event) {
            Ok(step) => step,
            Err(rejection) => {
                self.rejected += 1;
                log::debug!("Rejected {}: {}", event.event.kind(), rejection);
                return Outcome::Rejected(rejection);
            }
        };
        self.current.events.push(event);

        match step {
            Step::End(winner) => {
                self.crown(winner);
                self.finalize(EndReason::MatchEnd);
            }
            Step::Continue => {
                // Placeholder teams alone never make a roster
                let real_teams = self.current.teams.iter().filter(|t| !t.placeholder).count();
                let unplaced = self.current.teams.iter().filter(|t| t.placement.is_none()).count();
                if real_teams >= 2 && unplaced <= 1 {
                    self.finalize(EndReason::LastTeamStanding);
                }
            }
        }

        if self.phase == TrackerPhase::Finalized {
            Outcome::Finalized
        } else {
            Outcome::Applied
        }
    }

    fn dispatch(&mut self, at: Option<NaiveDateTime>, event: &LogEvent) -> Result<Step, Rejection> {
        match event {
            LogEvent::MatchStart { game_id, map } => {
                if self.phase == TrackerPhase::Active && self.conflicts_with(game_id, map) {
                    return Err(Rejection::DifferentMatch {
                        current: self.current.id.game_id.clone(),
                        incoming: game_id.clone(),
                    });
                }
                if self.current.id.game_id.is_none() {
                    self.current.id.game_id = game_id.clone();
                }
                if self.current.map.is_none() {
                    self.current.map = map.clone();
                }
                self.activate(at);
                Ok(Step::Continue)
            }
            LogEvent::MatchEnd { winner } => {
                if self.phase == TrackerPhase::Empty {
                    return Err(Rejection::NotStarted);
                }
                Ok(Step::End(winner.clone()))
            }
            LogEvent::PlayerRegistered {
                player,
                team,
                team_id,
            } => {
                self.register_player(player, player, team, team_id.as_deref())?;
                self.activate(at);
                Ok(Step::Continue)
            }
            LogEvent::PlayerEliminated { victim, killer, .. } => {
                self.activate(at);
                self.eliminate_player(victim, killer.as_deref());
                Ok(Step::Continue)
            }
            LogEvent::TeamEliminated { team, placement } => {
                self.activate(at);
                self.eliminate_team(team, *placement);
                Ok(Step::Continue)
            }
            LogEvent::PlayerStatus(status) => {
                self.apply_player_status(status)?;
                self.activate(at);
                Ok(Step::Continue)
            }
            LogEvent::TeamStatus(status) => {
                self.activate(at);
                self.apply_team_status(status);
                Ok(Step::Continue)
            }
        }
    }

    fn activate(&mut self, at: Option<NaiveDateTime>) {
        if self.current.id.started_at.is_none() {
            self.current.id.started_at = at;
        }
        if self.phase == TrackerPhase::Empty {
            self.phase = TrackerPhase::Active;
            log::info!("🎮 Match started: {}", self.current.id);
        }
    }

    fn team_index(&self, name: &str) -> Option<usize> {
        self.current.teams.iter().position(|t| t.name == name)
    }

    fn locate_player(&self, id: &str) -> Option<(usize, usize)> {
        self.current.teams.iter().enumerate().find_map(|(t, team)| {
            team.players
                .iter()
                .position(|p| p.id == id)
                .map(|p| (t, p))
        })
    }

    fn placements_started(&self) -> bool {
        self.current.teams.iter().any(|t| t.placement.is_some())
    }

    fn ensure_team(&mut self, name: &str, team_id: Option<&str>, placeholder: bool) -> usize {
        if let Some(t) = self.team_index(name) {
            let team = &mut self.current.teams[t];
            if team.team_id.is_none() {
                team.team_id = team_id.map(str::to_string);
            }
            if !placeholder {
                team.placeholder = false;
            }
            return t;
        }

        if self.placements_started() {
            log::warn!("⚠️  Team {} joined {} after eliminations began", name, self.current.id);
        }
        let mut team = Team::new(name, team_id.map(str::to_string));
        team.placeholder = placeholder;
        self.current.teams.push(team);
        if let Some(id) = team_id {
            self.team_names.insert(id.to_string(), name.to_string());
        }
        self.current.teams.len() - 1
    }

    fn register_player(
        &mut self,
        id: &str,
        name: &str,
        team: &str,
        team_id: Option<&str>,
    ) -> Result<(usize, usize), Rejection> {
        let Some((t, p)) = self.locate_player(id) else {
            let t = self.ensure_team(team, team_id, false);
            self.current.teams[t].players.push(Player::new(id, name, team));
            return Ok((t, self.current.teams[t].players.len() - 1));
        };

        if self.current.teams[t].name == team {
            return Ok((t, p));
        }
        if !self.current.teams[t].players[p].placeholder {
            return Err(Rejection::TeamConflict {
                player: id.to_string(),
                registered: self.current.teams[t].name.clone(),
                requested: team.to_string(),
            });
        }

        // Move a placeholder into the team it actually plays for
        let mut player = self.current.teams[t].players.remove(p);
        let old_team = &self.current.teams[t];
        if old_team.placeholder
            && old_team.players.is_empty()
            && old_team.placement.is_none()
            && !self.placements_started()
        {
            self.current.teams.remove(t);
        }

        player.placeholder = false;
        player.name = name.to_string();
        player.team = team.to_string();
        let t = self.ensure_team(team, team_id, false);
        self.current.teams[t].players.push(player);
        log::debug!("Placeholder player {} moved to {}", id, team);
        Ok((t, self.current.teams[t].players.len() - 1))
    }

    fn player_or_placeholder(&mut self, id: &str) -> (usize, usize) {
        if let Some(found) = self.locate_player(id) {
            return found;
        }
        log::debug!("Unregistered player {} in {}, adding placeholder", id, self.current.id);
        let t = self.ensure_team(UNKNOWN_TEAM, None, true);
        self.current.teams[t].placeholder = true;
        self.current.teams[t]
            .players
            .push(Player::placeholder(id, UNKNOWN_TEAM));
        (t, self.current.teams[t].players.len() - 1)
    }

    fn alive_players(&self) -> u32 {
        self.current.teams.iter().map(|t| t.alive_players() as u32).sum()
    }

    fn mark_eliminated(&mut self, t: usize, p: usize) -> bool {
        if !self.current.teams[t].players[p].is_alive() {
            return false;
        }
        let alive_before = self.alive_players();
        let player = &mut self.current.teams[t].players[p];
        player.state = PlayerState::Eliminated;
        player.elimination_placement = Some(alive_before);
        true
    }

    fn eliminate_player(&mut self, victim: &str, killer: Option<&str>) {
        let (vt, vp) = self.player_or_placeholder(victim);
        if !self.mark_eliminated(vt, vp) {
            log::debug!("Duplicate elimination of {} ignored", victim);
            return;
        }

        if let Some(killer) = killer.filter(|k| *k != victim) {
            let (kt, kp) = self.player_or_placeholder(killer);
            self.current.teams[kt].players[kp].kills += 1;
        }

        self.check_team_wiped(vt);
    }

    fn check_team_wiped(&mut self, t: usize) {
        let team = &self.current.teams[t];
        if team.placement.is_none() && !team.players.is_empty() && team.alive_players() == 0 {
            self.place_eliminated(t, None);
        }
    }

    fn taken_placements(&self) -> HashSet<u32> {
        self.current.teams.iter().filter_map(|t| t.placement).collect()
    }

    fn largest_free_placement(&self) -> u32 {
        let taken = self.taken_placements();
        let n = self.current.teams.len() as u32;
        (1..=n).rev().find(|p| !taken.contains(p)).unwrap_or(n)
    }

    fn smallest_free_placement(&self) -> u32 {
        let taken = self.taken_placements();
        let n = self.current.teams.len() as u32;
        (1..=n).find(|p| !taken.contains(p)).unwrap_or(n)
    }

    fn place_eliminated(&mut self, t: usize, reported: Option<u32>) {
        let placement = self.largest_free_placement();
        if let Some(reported) = reported.filter(|r| *r != placement) {
            log::debug!(
                "Log reports placement {} for {}, using {}",
                reported,
                self.current.teams[t].name,
                placement
            );
        }

        for p in 0..self.current.teams[t].players.len() {
            self.mark_eliminated(t, p);
        }
        let team = &mut self.current.teams[t];
        team.placement = Some(placement);
        let name = team.name.clone();
        log::info!("💀 {} eliminated, placement #{}", name, placement);
        self.current.elimination_order.push(name);
    }

    fn eliminate_team(&mut self, name: &str, reported: Option<u32>) {
        let t = self.ensure_team(name, None, true);
        if self.current.teams[t].placement.is_some() {
            log::debug!("Team {} already placed, elimination ignored", name);
            return;
        }
        self.place_eliminated(t, reported);
    }

    fn team_name_for(&mut self, team_id: &str, team_name: Option<&str>) -> String {
        match team_name {
            Some(name) => {
                self.team_names
                    .insert(team_id.to_string(), name.to_string());
                name.to_string()
            }
            None => self
                .team_names
                .get(team_id)
                .cloned()
                .unwrap_or_else(|| format!("Team {}", team_id)),
        }
    }

    fn apply_player_status(&mut self, status: &PlayerStatus) -> Result<(), Rejection> {
        let team = self.team_name_for(&status.team_id, status.team_name.as_deref());
        let name = status.name.as_deref().unwrap_or(&status.player_id);
        let (t, p) = self.register_player(&status.player_id, name, &team, Some(status.team_id.as_str()))?;

        let player = &mut self.current.teams[t].players[p];
        player.kills = player.kills.max(status.kills);
        player.damage = player.damage.max(status.damage);
        player.knockouts = player.knockouts.max(status.knockouts);
        player.assists = player.assists.max(status.assists);

        if !status.alive && self.mark_eliminated(t, p) {
            self.check_team_wiped(t);
        }
        Ok(())
    }

    fn apply_team_status(&mut self, status: &TeamStatus) {
        let name = self.team_name_for(&status.team_id, status.team_name.as_deref());
        let t = self.ensure_team(&name, Some(status.team_id.as_str()), false);
        let team = &self.current.teams[t];
        if status.live_members == 0 && team.placement.is_none() && !team.players.is_empty() {
            self.place_eliminated(t, None);
        }
    }

    /// Winner of an explicit MatchEnd takes first place if still free
    fn crown(&mut self, winner: Option<String>) {
        let Some(winner) = winner else {
            return;
        };
        let t = self.ensure_team(&winner, None, true);
        match self.current.teams[t].placement {
            None => {
                let placement = self.smallest_free_placement();
                self.current.teams[t].placement = Some(placement);
            }
            Some(placement) => log::warn!(
                "⚠️  MatchEnd names {} as winner but it already holds placement #{}",
                winner,
                placement
            ),
        }
    }

    /// Close the match: every unplaced team gets the remaining placements,
    /// best first by alive players, then kills, then roster order.
    ///
    /// Returns false when the match was already finalized.
    pub fn finalize(&mut self, reason: EndReason) -> bool {
        if self.phase == TrackerPhase::Finalized {
            return false;
        }

        let mut unplaced: Vec<usize> = (0..self.current.teams.len())
            .filter(|t| self.current.teams[*t].placement.is_none())
            .collect();
        unplaced.sort_by(|a, b| {
            let (ta, tb) = (&self.current.teams[*a], &self.current.teams[*b]);
            tb.alive_players()
                .cmp(&ta.alive_players())
                .then(tb.kills().cmp(&ta.kills()))
                .then(a.cmp(b))
        });
        for t in unplaced {
            let placement = self.smallest_free_placement();
            self.current.teams[t].placement = Some(placement);
        }

        self.current.winner = self
            .current
            .teams
            .iter()
            .find(|t| t.placement == Some(1))
            .map(|t| t.name.clone());
        self.current.status = MatchStatus::Finalized;
        self.current.finalized_at = Some(Utc::now());
        self.current.end_reason = Some(reason);
        self.phase = TrackerPhase::Finalized;

        log::info!(
            "🏁 Finalized {} ({:?}), winner: {}",
            self.current.id,
            reason,
            self.current.winner.as_deref().unwrap_or("none")
        );
        true
    }
}
