//! Normalized match model shared by the parser, tracker and scorer

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Team name given to auto-created teams of players seen before registration
pub const UNKNOWN_TEAM: &str = "Unknown Team";

/// Identity of one match: the log it came from plus what the log said about it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchId {
    pub source: String,
    pub sequence: u32,
    pub game_id: Option<String>,
    pub started_at: Option<NaiveDateTime>,
}

impl MatchId {
    pub fn new(source: impl Into<String>, sequence: u32) -> Self {
        Self {
            source: source.into(),
            sequence,
            game_id: None,
            started_at: None,
        }
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source, self.sequence)?;
        if let Some(game_id) = &self.game_id {
            write!(f, " (game {})", game_id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Alive,
    Eliminated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub team: String,
    pub state: PlayerState,
    pub kills: u32,
    pub damage: u32,
    pub knockouts: u32,
    pub assists: u32,
    /// Players still alive (this one included) at the moment of elimination
    pub elimination_placement: Option<u32>,
    #[serde(default)]
    pub placeholder: bool,
}

impl Player {
    pub fn new(id: impl Into<String>, name: impl Into<String>, team: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            team: team.into(),
            state: PlayerState::Alive,
            kills: 0,
            damage: 0,
            knockouts: 0,
            assists: 0,
            elimination_placement: None,
            placeholder: false,
        }
    }

    /// Stand-in for a player referenced by an event before any registration
    pub fn placeholder(id: impl Into<String>, team: impl Into<String>) -> Self {
        let id = id.into();
        let mut player = Self::new(id.clone(), id, team);
        player.placeholder = true;
        player
    }

    pub fn is_alive(&self) -> bool {
        self.state == PlayerState::Alive
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    /// Vendor team number, when the log carries one
    pub team_id: Option<String>,
    pub players: Vec<Player>,
    pub placement: Option<u32>,
    #[serde(default)]
    pub placeholder: bool,
}

impl Team {
    pub fn new(name: impl Into<String>, team_id: Option<String>) -> Self {
        Self {
            name: name.into(),
            team_id,
            players: Vec::new(),
            placement: None,
            placeholder: false,
        }
    }

    pub fn kills(&self) -> u32 {
        self.players.iter().map(|p| p.kills).sum()
    }

    pub fn alive_players(&self) -> usize {
        self.players.iter().filter(|p| p.is_alive()).count()
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    InProgress,
    Finalized,
}

/// Which signal closed a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    MatchEnd,
    LastTeamStanding,
    /// The same log announced a different match
    Superseded,
    /// A newer log file became active
    Rotated,
    /// The log went quiet or ended while the match was running
    StreamEnded,
    ForcedEnd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub status: MatchStatus,
    pub map: Option<String>,
    pub teams: Vec<Team>,
    #[serde(default)]
    pub events: Vec<TimedEvent>,
    pub elimination_order: Vec<String>,
    pub winner: Option<String>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
    #[serde(default)]
    pub malformed_lines: u32,
}

impl Match {
    pub fn new(id: MatchId) -> Self {
        Self {
            id,
            status: MatchStatus::InProgress,
            map: None,
            teams: Vec::new(),
            events: Vec::new(),
            elimination_order: Vec::new(),
            winner: None,
            finalized_at: None,
            end_reason: None,
            malformed_lines: 0,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.status == MatchStatus::Finalized
    }

    pub fn team(&self, name: &str) -> Option<&Team> {
        self.teams.iter().find(|t| t.name == name)
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.teams.iter().find_map(|t| t.player(id))
    }

    pub fn player_count(&self) -> usize {
        self.teams.iter().map(|t| t.players.len()).sum()
    }
}

/// A parsed event plus the timestamp prefix of its log line, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub at: Option<NaiveDateTime>,
    pub event: LogEvent,
}

impl TimedEvent {
    pub fn new(at: Option<NaiveDateTime>, event: LogEvent) -> Self {
        Self { at, event }
    }

    pub fn untimed(event: LogEvent) -> Self {
        Self { at: None, event }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    MatchStart {
        game_id: Option<String>,
        map: Option<String>,
    },
    PlayerRegistered {
        player: String,
        team: String,
        team_id: Option<String>,
    },
    PlayerEliminated {
        victim: String,
        killer: Option<String>,
        weapon: Option<String>,
    },
    TeamEliminated {
        team: String,
        placement: Option<u32>,
    },
    MatchEnd {
        winner: Option<String>,
    },
    /// Full per-player state line from the observer feed
    PlayerStatus(PlayerStatus),
    /// Per-team state line from the observer feed
    TeamStatus(TeamStatus),
}

impl LogEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LogEvent::MatchStart { .. } => "MatchStart",
            LogEvent::PlayerRegistered { .. } => "PlayerRegistered",
            LogEvent::PlayerEliminated { .. } => "PlayerEliminated",
            LogEvent::TeamEliminated { .. } => "TeamEliminated",
            LogEvent::MatchEnd { .. } => "MatchEnd",
            LogEvent::PlayerStatus(_) => "PlayerStatus",
            LogEvent::TeamStatus(_) => "TeamStatus",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub player_id: String,
    pub name: Option<String>,
    pub team_id: String,
    pub team_name: Option<String>,
    pub alive: bool,
    pub health: Option<u32>,
    pub kills: u32,
    pub damage: u32,
    pub knockouts: u32,
    pub assists: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStatus {
    pub team_id: String,
    pub team_name: Option<String>,
    pub live_members: u32,
    pub kills: Option<u32>,
}
