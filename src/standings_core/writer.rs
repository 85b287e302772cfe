//! Snapshot publication
//!
//! Sinks write the whole document at once. The file sink goes through a
//! temp file in the target directory and a rename, so readers see either the
//! previous snapshot or the new one.

use super::model::MatchId;
use super::snapshot::Snapshot;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug)]
pub enum PublishError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl From<std::io::Error> for PublishError {
    fn from(err: std::io::Error) -> Self {
        PublishError::Io(err)
    }
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        PublishError::Serialization(err)
    }
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::Io(e) => write!(f, "IO error: {}", e),
            PublishError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for PublishError {}

/// Destination for published snapshots
#[async_trait]
pub trait SnapshotSink: Send {
    /// Replace the published document with `snapshot`
    async fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), PublishError>;

    /// Sink type for logging
    fn sink_type(&self) -> &'static str;
}

pub struct FileSnapshotSink {
    path: PathBuf,
}

impl FileSnapshotSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotSink for FileSnapshotSink {
    async fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), PublishError> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.path, &json).await?;
        log::debug!("Wrote {} bytes to {}", json.len(), self.path.display());
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "JSON file"
    }
}

/// `<dir>/.<name>.tmp` next to the target, so the rename stays on one filesystem
pub fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

/// Write `bytes` to a temp file, fsync it, then rename it over `path`
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let temp = temp_path_for(path);

    let result = async {
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp).await;
    }
    result
}

/// Publishes only when the set of finalized matches changed
pub struct SnapshotPublisher {
    sink: Box<dyn SnapshotSink>,
    last_published: Option<BTreeSet<MatchId>>,
    published: u64,
}

impl SnapshotPublisher {
    pub fn new(sink: Box<dyn SnapshotSink>) -> Self {
        log::info!("📝 Publishing snapshots to {} sink", sink.sink_type());
        Self {
            sink,
            last_published: None,
            published: 0,
        }
    }

    pub fn needs_publish(&self, ids: &BTreeSet<MatchId>) -> bool {
        self.last_published.as_ref() != Some(ids)
    }

    pub fn published_count(&self) -> u64 {
        self.published
    }

    /// Returns `Ok(false)` when nothing changed since the last successful publish.
    /// On error the previous artifact stays in place and the next call retries.
    pub async fn publish(
        &mut self,
        ids: BTreeSet<MatchId>,
        snapshot: &Snapshot,
    ) -> Result<bool, PublishError> {
        if !self.needs_publish(&ids) {
            return Ok(false);
        }
        self.sink.write_snapshot(snapshot).await?;
        self.last_published = Some(ids);
        self.published += 1;
        Ok(true)
    }
}
