use {
    crate::standings_core::{reader::FileCursor, writer::write_atomic, Match, MatchId},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug)]
pub enum CheckpointError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    UnsupportedVersion(u32),
}

impl From<std::io::Error> for CheckpointError {
    fn from(err: std::io::Error) -> Self {
        CheckpointError::Io(err)
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(err: serde_json::Error) -> Self {
        CheckpointError::Serialization(err)
    }
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointError::Io(e) => write!(f, "IO error: {}", e),
            CheckpointError::Serialization(e) => write!(f, "Serialization error: {}", e),
            CheckpointError::UnsupportedVersion(v) => write!(f, "Unsupported checkpoint version {}", v),
        }
    }
}

impl std::error::Error for CheckpointError {}

/// Everything needed to continue after a restart without re-reading the log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub cursor: Option<FileCursor>,
    /// Read positions in logs that were active earlier
    #[serde(default)]
    pub file_cursors: Vec<FileCursor>,
    pub next_sequence: u32,
    pub current_source: Option<String>,
    pub in_progress: Option<Match>,
    /// The match closed last in the current source, kept behind the gate
    #[serde(default)]
    pub last_finalized: Option<MatchId>,
    pub session_matches: Vec<Match>,
    pub saved_at: i64,
}

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save atomically; a crash mid-save leaves the previous checkpoint intact
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(checkpoint)?;
        write_atomic(&self.path, &json).await?;

        log::debug!(
            "Saved checkpoint ({} session matches) to {}",
            checkpoint.session_matches.len(),
            self.path.display()
        );
        Ok(())
    }

    /// `Ok(None)` when no checkpoint exists yet
    pub fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        if !self.path.exists() {
            log::info!("No existing checkpoint found: {}", self.path.display());
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&json)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion(checkpoint.version));
        }

        log::info!(
            "💾 Loaded checkpoint from {}: {} session matches, match in progress: {}",
            self.path.display(),
            checkpoint.session_matches.len(),
            checkpoint.in_progress.is_some()
        );
        Ok(Some(checkpoint))
    }
}
