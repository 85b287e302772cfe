//! Standings Core - incremental log-to-standings engine
//!
//! Turns a growing battle-royale event log into per-match and cumulative
//! standings, and publishes them as one JSON document.
//!
//! # Architecture
//!
//! ```text
//! LiveLogSource (newest *.txt, byte cursor) / ArchiveLogSource
//!     ↓
//! LogParser (tagged records + observer feed objects)
//!     ↓
//! MatchAssembler → MatchTracker (roster, eliminations, placements)
//!     ↓ finalized matches
//! ScoringEngine (placement + kill points, aggregate, top players)
//!     ↓
//! SnapshotBuilder (+ TeamDirectory styles)
//!     ↓
//! SnapshotPublisher → FileSnapshotSink (temp file + rename)
//! ```

pub mod assembler;
pub mod model;
pub mod parser;
pub mod reader;
pub mod scorer;
pub mod snapshot;
pub mod teams;
pub mod tracker;
pub mod writer;

pub use assembler::{replay_archive, AssemblerStats, MatchAssembler};
pub use model::{
    EndReason, LogEvent, Match, MatchId, MatchStatus, Player, PlayerState, PlayerStatus, Team,
    TeamStatus, TimedEvent, UNKNOWN_TEAM,
};
pub use parser::{LogParser, MalformedRecord, ParsedLine};
pub use reader::{
    read_finished, ArchiveLogSource, FileCursor, LiveLogSource, LogFile, SourceError, SourceEvent,
};
pub use scorer::{AggregateRow, PlayerRow, ScoringEngine, ScoringRules, StandingsRow};
pub use snapshot::{Snapshot, SnapshotBuilder};
pub use teams::{TeamDirectory, TeamStyle};
pub use tracker::{MatchTracker, Outcome, Rejection, TrackerPhase};
pub use writer::{FileSnapshotSink, PublishError, SnapshotPublisher, SnapshotSink};
