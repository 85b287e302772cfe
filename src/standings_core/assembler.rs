//! Turns a stream of log lines into finalized matches
//!
//! The assembler owns the parser and the current [`MatchTracker`] for one
//! source at a time. It decides where one match ends and the next begins and
//! hands finished matches back to the caller; it never scores anything.

use super::model::{EndReason, Match, MatchId};
use super::parser::{LogParser, ParsedLine};
use super::reader::ArchiveLogSource;
use super::tracker::{MatchTracker, Outcome, TrackerPhase};

/// Line counters, mostly for the periodic status log
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerStats {
    pub lines: u64,
    pub applied: u64,
    pub ignored: u64,
    pub malformed: u64,
    pub rejected: u64,
}

pub struct MatchAssembler {
    parser: LogParser,
    source: Option<String>,
    tracker: Option<MatchTracker>,
    next_sequence: u32,
    stats: AssemblerStats,
}

impl Default for MatchAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchAssembler {
    pub fn new() -> Self {
        Self::with_sequence(1)
    }

    pub fn with_sequence(next_sequence: u32) -> Self {
        Self {
            parser: LogParser::new(),
            source: None,
            tracker: None,
            next_sequence,
            stats: AssemblerStats::default(),
        }
    }

    /// Pick up a source and in-progress match saved by a checkpoint.
    ///
    /// Without an in-progress match, `last_finalized` reinstates the closed
    /// game so its late lines still hit the finalization gate.
    pub fn resume(
        source: Option<String>,
        current: Option<Match>,
        last_finalized: Option<MatchId>,
        next_sequence: u32,
    ) -> Self {
        let mut assembler = Self::with_sequence(next_sequence);
        assembler.source = source;
        assembler.tracker = current
            .map(MatchTracker::resume)
            .or_else(|| last_finalized.map(MatchTracker::closed));
        assembler
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Make sure matches started from now on are numbered at least `next`
    pub fn reserve_sequences(&mut self, next: u32) {
        self.next_sequence = self.next_sequence.max(next);
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// The match currently being built, finalized ones excluded
    pub fn current(&self) -> Option<&Match> {
        self.tracker
            .as_ref()
            .filter(|t| t.phase() != TrackerPhase::Finalized)
            .map(|t| t.current())
    }

    /// Identity of the match the tracker closed last, while no new one has begun
    pub fn last_finalized(&self) -> Option<&MatchId> {
        self.tracker
            .as_ref()
            .filter(|t| t.phase() == TrackerPhase::Finalized)
            .map(|t| &t.current().id)
    }

    pub fn is_active(&self) -> bool {
        self.tracker
            .as_ref()
            .map_or(false, |t| t.phase() == TrackerPhase::Active)
    }

    /// Switch to a new source; the caller finalizes or discards first
    pub fn begin_source(&mut self, source: &str) {
        if self.current().is_some() {
            log::warn!(
                "⚠️  Switching to {} with an unfinished match still buffered",
                source
            );
        }
        self.source = Some(source.to_string());
        self.tracker = None;
    }

    pub fn feed_line(&mut self, line: &str) -> Vec<Match> {
        self.stats.lines += 1;
        match self.parser.parse_line(line) {
            ParsedLine::Ignored => {
                self.stats.ignored += 1;
                Vec::new()
            }
            ParsedLine::Malformed(record) => {
                self.stats.malformed += 1;
                log::warn!(
                    "⚠️  {} in {}: {}",
                    record,
                    self.source.as_deref().unwrap_or("unknown source"),
                    preview(line)
                );
                if let Some(tracker) = self.tracker.as_mut() {
                    tracker.note_malformed();
                }
                Vec::new()
            }
            ParsedLine::Event(event) => {
                let mut finished = Vec::new();

                let starts_new = self
                    .tracker
                    .as_ref()
                    .map_or(false, |t| t.starts_new_match(&event.event));
                if starts_new {
                    finished.extend(self.finalize_current(EndReason::Superseded));
                    self.tracker = None;
                }

                if self.tracker.is_none() {
                    let id = MatchId::new(
                        self.source.clone().unwrap_or_else(|| "unknown".to_string()),
                        self.next_sequence,
                    );
                    self.next_sequence += 1;
                    self.tracker = Some(MatchTracker::new(id));
                }

                let Some(tracker) = self.tracker.as_mut() else {
                    return finished;
                };
                match tracker.apply(event) {
                    Outcome::Applied => self.stats.applied += 1,
                    Outcome::Finalized => {
                        self.stats.applied += 1;
                        if let Some(done) = hand_out(tracker.current().clone()) {
                            finished.push(done);
                        }
                    }
                    Outcome::Rejected(_) => self.stats.rejected += 1,
                }
                finished
            }
        }
    }

    /// Close the match in progress, if any; empty matches are dropped
    pub fn finalize_current(&mut self, reason: EndReason) -> Option<Match> {
        let tracker = self.tracker.as_mut()?;
        match tracker.phase() {
            TrackerPhase::Active => {
                tracker.finalize(reason);
                hand_out(tracker.current().clone())
            }
            TrackerPhase::Empty => {
                self.tracker = None;
                None
            }
            TrackerPhase::Finalized => None,
        }
    }

    /// Run a whole finished log through the assembler.
    ///
    /// A match still open at the end of `lines` is closed as
    /// [`EndReason::StreamEnded`].
    pub fn assemble_finished(&mut self, source: &str, lines: &[String]) -> Vec<Match> {
        let before = self.stats;
        self.begin_source(source);

        let mut matches = Vec::new();
        for line in lines {
            matches.extend(self.feed_line(line));
        }
        matches.extend(self.finalize_current(EndReason::StreamEnded));

        log::debug!(
            "Replayed {}: {} lines, {} applied, {} malformed, {} rejected",
            source,
            self.stats.lines - before.lines,
            self.stats.applied - before.applied,
            self.stats.malformed - before.malformed,
            self.stats.rejected - before.rejected
        );
        matches
    }

    /// Throw away an unfinished match after its source was rewritten
    pub fn discard_current(&mut self) -> Option<MatchId> {
        let discarded = self.current().map(|m| m.id.clone());
        self.tracker = None;
        discarded
    }
}

/// Finished matches leave without their raw event log
fn hand_out(mut m: Match) -> Option<Match> {
    if m.teams.is_empty() {
        log::info!("🗑️  Dropping {} with an empty roster", m.id);
        return None;
    }
    m.events = Vec::new();
    Some(m)
}

fn preview(line: &str) -> &str {
    match line.char_indices().nth(160) {
        Some((end, _)) => &line[..end],
        None => line,
    }
}

/// Rebuild every match recorded in the archive directory.
///
/// Each file is replayed on its own; a match still open at the end of its
/// file is finalized as [`EndReason::StreamEnded`]. Unreadable files are
/// skipped.
pub async fn replay_archive(archive: &ArchiveLogSource) -> Vec<Match> {
    let files = match archive.files().await {
        Ok(files) => files,
        Err(e) => {
            log::warn!("⚠️  Archive unavailable: {}", e);
            return Vec::new();
        }
    };

    let mut matches = Vec::new();
    for path in &files {
        let lines = match ArchiveLogSource::read_all(path).await {
            Ok(lines) => lines,
            Err(e) => {
                log::warn!("⚠️  Skipping archive file: {}", e);
                continue;
            }
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mut assembler = MatchAssembler::new();
        matches.extend(assembler.assemble_finished(&format!("archive/{}", name), &lines));
    }

    log::info!(
        "📚 Replayed {} archived matches from {} files in {}",
        matches.len(),
        files.len(),
        archive.dir().display()
    );
    matches
}
