//! Log line parsing into typed match events
//!
//! Two record families share the same log:
//! - tagged records: `[2025-08-31 10:00:00] PlayerEliminated { victim: 'p1', killer: 'p2' }`
//! - observer feed records: `GameID: "12345"` and bare `{ uId: 1001, teamId: 1, ... }`
//!   objects emitted under `TotalPlayerList:` / `TeamInfoList:` headers
//!
//! Anything else (headers, HTTP request lines, chatter) is ignored.

use super::model::{LogEvent, PlayerStatus, TeamStatus, TimedEvent};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fmt;

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

/// Observer feed `liveState` value for a dead player
pub const LIVE_STATE_DEAD: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Event(TimedEvent),
    Ignored,
    Malformed(MalformedRecord),
}

/// A recognized record that could not be turned into an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub kind: &'static str,
    pub reason: String,
}

impl MalformedRecord {
    fn new(kind: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed {} record: {}", self.kind, self.reason)
    }
}

impl std::error::Error for MalformedRecord {}

/// Stateless line parser
#[derive(Debug, Default, Clone, Copy)]
pub struct LogParser;

impl LogParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_line(&self, line: &str) -> ParsedLine {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ParsedLine::Ignored;
        }

        let (at, rest) = split_timestamp(trimmed);
        let rest = rest.trim();
        if rest.is_empty() {
            return ParsedLine::Ignored;
        }

        let parsed = if let Some(value) = rest.strip_prefix("GameID:") {
            parse_game_id(value).map(Some)
        } else if rest.starts_with('{') {
            parse_feed_object(rest)
        } else {
            parse_tagged(rest)
        };

        match parsed {
            Ok(Some(event)) => ParsedLine::Event(TimedEvent::new(at, event)),
            Ok(None) => ParsedLine::Ignored,
            Err(record) => ParsedLine::Malformed(record),
        }
    }
}

/// Strip a leading `[...]` prefix, keeping its timestamp when it parses as one
fn split_timestamp(line: &str) -> (Option<NaiveDateTime>, &str) {
    if !line.starts_with('[') {
        return (None, line);
    }
    let Some(end) = line.find(']') else {
        return (None, line);
    };
    let inner = line[1..end].trim();
    let at = TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(inner, format).ok());
    (at, &line[end + 1..])
}

fn parse_game_id(value: &str) -> Result<LogEvent, MalformedRecord> {
    let game_id = unquote(value.trim());
    if game_id.is_empty() {
        return Err(MalformedRecord::new("GameID", "empty game id"));
    }
    Ok(LogEvent::MatchStart {
        game_id: Some(game_id.to_string()),
        map: None,
    })
}

fn parse_tagged(rest: &str) -> Result<Option<LogEvent>, MalformedRecord> {
    let tag_end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let tag = &rest[..tag_end];
    let body = rest[tag_end..].trim_start();

    let kind: &'static str = match tag {
        "MatchStart" => "MatchStart",
        "PlayerRegistered" => "PlayerRegistered",
        "PlayerEliminated" => "PlayerEliminated",
        "TeamEliminated" => "TeamEliminated",
        "MatchEnd" => "MatchEnd",
        _ => return Ok(None),
    };

    if !body.starts_with('{') {
        return Err(MalformedRecord::new(kind, "expected '{' after tag"));
    }
    let fields = Fields::parse(body).map_err(|reason| MalformedRecord::new(kind, reason))?;

    let event = match kind {
        "MatchStart" => LogEvent::MatchStart {
            map: Some(fields.required(kind, "map")?),
            game_id: fields.optional("gameId"),
        },
        "PlayerRegistered" => LogEvent::PlayerRegistered {
            player: fields.required(kind, "player")?,
            team: fields.required(kind, "team")?,
            team_id: fields.optional("teamId"),
        },
        "PlayerEliminated" => LogEvent::PlayerEliminated {
            victim: fields.required(kind, "victim")?,
            killer: fields.optional("killer"),
            weapon: fields.optional("weapon"),
        },
        "TeamEliminated" => {
            let placement = fields.number(kind, "placement")?;
            if placement == Some(0) {
                return Err(MalformedRecord::new(kind, "placement must be positive"));
            }
            LogEvent::TeamEliminated {
                team: fields.required(kind, "team")?,
                placement,
            }
        }
        _ => LogEvent::MatchEnd {
            winner: fields.optional("winner"),
        },
    };
    Ok(Some(event))
}

fn parse_feed_object(rest: &str) -> Result<Option<LogEvent>, MalformedRecord> {
    let fields = Fields::parse(rest).map_err(|reason| MalformedRecord::new("feed object", reason))?;

    if fields.contains("uId") {
        let kind = "PlayerStatus";
        let live_state = fields.integer(kind, "liveState")?.unwrap_or(0);
        let status = PlayerStatus {
            player_id: fields.required(kind, "uId")?,
            name: fields.optional("playerName"),
            team_id: fields.required(kind, "teamId")?,
            team_name: fields.optional("teamName"),
            alive: live_state != LIVE_STATE_DEAD,
            health: fields.number(kind, "health")?,
            kills: fields.number(kind, "killNum")?.unwrap_or(0),
            damage: fields.number(kind, "damage")?.unwrap_or(0),
            knockouts: fields.number(kind, "knockouts")?.unwrap_or(0),
            assists: fields.number(kind, "assists")?.unwrap_or(0),
        };
        return Ok(Some(LogEvent::PlayerStatus(status)));
    }

    if fields.contains("liveMemberNum") {
        let kind = "TeamStatus";
        let status = TeamStatus {
            team_id: fields.required(kind, "teamId")?,
            team_name: fields.optional("teamName"),
            live_members: fields.number(kind, "liveMemberNum")?.unwrap_or(0),
            kills: fields.number(kind, "totalKill")?,
        };
        return Ok(Some(LogEvent::TeamStatus(status)));
    }

    Ok(None)
}

fn unquote(value: &str) -> &str {
    for quote in ['\'', '"'] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn is_absent(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("null") || value.eq_ignore_ascii_case("none")
}

/// `{ key: value, ... }` payload with absent values already dropped
struct Fields(BTreeMap<String, String>);

impl Fields {
    fn parse(text: &str) -> Result<Self, String> {
        let mut chars = text.char_indices().peekable();
        match chars.next() {
            Some((_, '{')) => {}
            _ => return Err("expected '{'".to_string()),
        }

        let mut fields = BTreeMap::new();
        loop {
            while matches!(chars.peek(), Some((_, c)) if c.is_whitespace() || *c == ',') {
                chars.next();
            }

            let Some(&(start, c)) = chars.peek() else {
                return Err("unterminated object".to_string());
            };
            if c == '}' {
                break;
            }
            if !(c.is_alphanumeric() || c == '_') {
                return Err(format!("unexpected character '{}'", c));
            }

            let mut end = start;
            while let Some(&(i, c)) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    end = i + c.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let key = text[start..end].to_string();

            while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
                chars.next();
            }
            match chars.next() {
                Some((_, ':')) | Some((_, '=')) => {}
                Some((_, c)) => return Err(format!("expected ':' after '{}', found '{}'", key, c)),
                None => return Err("unterminated object".to_string()),
            }
            while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
                chars.next();
            }

            let value = match chars.peek() {
                Some(&(open, quote)) if quote == '\'' || quote == '"' => {
                    chars.next();
                    let mut close = None;
                    for (i, c) in chars.by_ref() {
                        if c == quote {
                            close = Some(i);
                            break;
                        }
                    }
                    match close {
                        Some(close) => text[open + 1..close].to_string(),
                        None => return Err(format!("unterminated string for '{}'", key)),
                    }
                }
                Some(&(value_start, _)) => {
                    let mut value_end = value_start;
                    while let Some(&(i, c)) = chars.peek() {
                        if c == ',' || c == '}' {
                            break;
                        }
                        value_end = i + c.len_utf8();
                        chars.next();
                    }
                    text[value_start..value_end].trim().to_string()
                }
                None => return Err("unterminated object".to_string()),
            };

            if !is_absent(value.trim()) {
                fields.insert(key, value);
            }
        }

        Ok(Self(fields))
    }

    fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.0.get(key).map(|v| v.trim().to_string())
    }

    fn required(&self, kind: &'static str, key: &str) -> Result<String, MalformedRecord> {
        self.optional(key)
            .ok_or_else(|| MalformedRecord::new(kind, format!("missing required field '{}'", key)))
    }

    fn integer(&self, kind: &'static str, key: &str) -> Result<Option<i64>, MalformedRecord> {
        let Some(raw) = self.0.get(key) else {
            return Ok(None);
        };
        let raw = raw.trim();
        if let Ok(value) = raw.parse::<i64>() {
            return Ok(Some(value));
        }
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Some(value.round() as i64)),
            _ => Err(MalformedRecord::new(
                kind,
                format!("field '{}' is not a number: {}", key, raw),
            )),
        }
    }

    fn number(&self, kind: &'static str, key: &str) -> Result<Option<u32>, MalformedRecord> {
        match self.integer(kind, key)? {
            None => Ok(None),
            Some(value) => u32::try_from(value).map(Some).map_err(|_| {
                MalformedRecord::new(kind, format!("field '{}' is out of range: {}", key, value))
            }),
        }
    }
}
