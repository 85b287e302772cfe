//! Log discovery and append-aware tailing with rotation detection
//!
//! The live source follows the most recently modified log in a directory.
//! Position is an explicit [`FileCursor`] (path, inode, byte offset) so a
//! restarted process can pick up where the previous one stopped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

pub const DEFAULT_MAX_READ_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug)]
pub enum SourceError {
    Directory { path: PathBuf, source: std::io::Error },
    Read { path: PathBuf, source: std::io::Error },
}

impl SourceError {
    fn read(path: &Path, source: std::io::Error) -> Self {
        SourceError::Read {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Directory { path, source } => {
                write!(f, "cannot list {}: {}", path.display(), source)
            }
            SourceError::Read { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Directory { source, .. } | SourceError::Read { source, .. } => Some(source),
        }
    }
}

/// Position inside the active log file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCursor {
    pub path: PathBuf,
    pub inode: Option<u64>,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub path: PathBuf,
    pub name: String,
}

impl LogFile {
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path: path.to_path_buf(),
            name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// A different file became the active log
    Opened(LogFile),
    /// The active file was truncated or replaced in place
    Reset(LogFile),
    Line(String),
}

pub struct LiveLogSource {
    dir: PathBuf,
    extensions: Vec<String>,
    cursor: Option<FileCursor>,
    /// Where reading stopped in files that are no longer active
    finished: BTreeMap<PathBuf, FileCursor>,
    max_read_bytes: u64,
}

impl LiveLogSource {
    pub fn new(dir: PathBuf, extensions: Vec<String>) -> Self {
        Self {
            dir,
            extensions: normalize_extensions(extensions),
            cursor: None,
            finished: BTreeMap::new(),
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }

    /// Resume from a previously exported cursor
    pub fn with_cursor(mut self, cursor: Option<FileCursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_max_read_bytes(mut self, max_read_bytes: u64) -> Self {
        self.max_read_bytes = max_read_bytes.max(1);
        self
    }

    pub fn restore_cursor(&mut self, cursor: Option<FileCursor>) {
        if let Some(cursor) = &cursor {
            log::info!(
                "📍 Resuming {} at byte {}",
                cursor.path.display(),
                cursor.offset
            );
        }
        self.cursor = cursor;
    }

    pub fn cursor(&self) -> Option<&FileCursor> {
        self.cursor.as_ref()
    }

    /// Positions in previously active files, for the checkpoint
    pub fn file_cursors(&self) -> Vec<FileCursor> {
        self.finished.values().cloned().collect()
    }

    pub fn restore_file_cursors(&mut self, cursors: Vec<FileCursor>) {
        for cursor in cursors {
            self.mark_finished(cursor);
        }
    }

    /// Remember that `cursor.path` was read up to `cursor.offset`
    pub fn mark_finished(&mut self, cursor: FileCursor) {
        if self.cursor.as_ref().map_or(false, |c| c.path == cursor.path) {
            return;
        }
        self.finished.insert(cursor.path.clone(), cursor);
    }

    /// Logs in the directory that are neither followed now nor read before
    pub async fn backlog(&self) -> Result<Vec<PathBuf>, SourceError> {
        let latest = find_latest_log(&self.dir, &self.extensions).await?;
        let listing = ArchiveLogSource {
            dir: self.dir.clone(),
            extensions: self.extensions.clone(),
        };
        let files = listing.files().await?;
        Ok(files
            .into_iter()
            .filter(|path| Some(path) != latest.as_ref())
            .filter(|path| self.cursor.as_ref().map_or(true, |c| c.path != *path))
            .filter(|path| !self.finished.contains_key(path))
            .collect())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Collect everything new since the last poll.
    ///
    /// The cursor only moves when the whole poll succeeds, so an error leaves
    /// the next poll to repeat the same work.
    pub async fn poll(&mut self) -> Result<Vec<SourceEvent>, SourceError> {
        let mut events = Vec::new();
        let mut retired = None;
        let Some(latest) = find_latest_log(&self.dir, &self.extensions).await? else {
            return Ok(events);
        };

        let mut cursor = match &self.cursor {
            Some(current) if current.path == latest => {
                let metadata = fs::metadata(&latest)
                    .await
                    .map_err(|e| SourceError::read(&latest, e))?;
                let inode = metadata_inode(&metadata);
                let replaced = matches!((current.inode, inode), (Some(old), Some(new)) if old != new);

                if replaced || metadata.len() < current.offset {
                    log::warn!(
                        "🔄 {} was truncated or replaced, reading from the start",
                        latest.display()
                    );
                    events.push(SourceEvent::Reset(LogFile::from_path(&latest)));
                    FileCursor {
                        path: latest,
                        inode,
                        offset: 0,
                    }
                } else {
                    current.clone()
                }
            }
            previous => {
                if let Some(previous) = previous {
                    let mut drained = previous.clone();
                    match drain(&mut drained, self.max_read_bytes).await {
                        Ok(lines) => {
                            events.extend(lines.into_iter().map(SourceEvent::Line));
                            retired = Some(drained);
                        }
                        Err(e) => {
                            log::warn!(
                                "⚠️  Could not finish reading {}: {}",
                                previous.path.display(),
                                e
                            );
                            retired = Some(previous.clone());
                        }
                    }
                }

                let metadata = fs::metadata(&latest)
                    .await
                    .map_err(|e| SourceError::read(&latest, e))?;
                let inode = metadata_inode(&metadata);
                let offset = match self.finished.get(&latest) {
                    Some(saved)
                        if saved.inode == inode && metadata.len() >= saved.offset =>
                    {
                        log::info!(
                            "📖 Active log: {} (resuming at byte {})",
                            latest.display(),
                            saved.offset
                        );
                        saved.offset
                    }
                    _ => {
                        log::info!("📖 Active log: {}", latest.display());
                        0
                    }
                };
                events.push(SourceEvent::Opened(LogFile::from_path(&latest)));
                FileCursor {
                    inode,
                    path: latest,
                    offset,
                }
            }
        };

        let (_, lines) = read_from(&mut cursor, self.max_read_bytes, false)
            .await
            .map_err(|e| SourceError::read(&cursor.path, e))?;
        events.extend(lines.into_iter().map(SourceEvent::Line));

        if let Some(retired) = retired {
            self.finished.insert(retired.path.clone(), retired);
        }
        self.finished.remove(&cursor.path);
        self.cursor = Some(cursor);

        Ok(events)
    }
}

/// Lists finished logs for one-shot replay
pub struct ArchiveLogSource {
    dir: PathBuf,
    extensions: Vec<String>,
}

impl ArchiveLogSource {
    pub fn new(dir: PathBuf, extensions: Vec<String>) -> Self {
        Self {
            dir,
            extensions: normalize_extensions(extensions),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Archive files ordered by file name
    pub async fn files(&self) -> Result<Vec<PathBuf>, SourceError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SourceError::Directory {
                    path: self.dir.clone(),
                    source: e,
                })
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SourceError::Directory {
                path: self.dir.clone(),
                source: e,
            })?
        {
            let path = entry.path();
            if !has_log_extension(&path, &self.extensions) {
                continue;
            }
            match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => files.push(path),
                _ => continue,
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Every non-blank line of a finished file, trailing unterminated line included
    pub async fn read_all(path: &Path) -> Result<Vec<String>, SourceError> {
        read_finished(path).await.map(|(lines, _)| lines)
    }
}

/// Read a finished file in full, with the cursor pointing past its last byte
pub async fn read_finished(path: &Path) -> Result<(Vec<String>, FileCursor), SourceError> {
    let metadata = fs::metadata(path).await.map_err(|e| SourceError::read(path, e))?;
    let bytes = fs::read(path).await.map_err(|e| SourceError::read(path, e))?;
    let cursor = FileCursor {
        path: path.to_path_buf(),
        inode: metadata_inode(&metadata),
        offset: bytes.len() as u64,
    };
    Ok((split_lines(&bytes), cursor))
}

/// Most recently modified log in `dir`; ties go to the later file name
pub async fn find_latest_log(
    dir: &Path,
    extensions: &[String],
) -> Result<Option<PathBuf>, SourceError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(SourceError::Directory {
                path: dir.to_path_buf(),
                source: e,
            })
        }
    };

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SourceError::Directory {
            path: dir.to_path_buf(),
            source: e,
        })?
    {
        let path = entry.path();
        if !has_log_extension(&path, extensions) {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        let newer = match &latest {
            Some((best_time, best_path)) => (modified, &path) > (*best_time, best_path),
            None => true,
        };
        if newer {
            latest = Some((modified, path));
        }
    }

    Ok(latest.map(|(_, path)| path))
}

fn normalize_extensions(extensions: Vec<String>) -> Vec<String> {
    extensions
        .into_iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn has_log_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .map_or(false, |ext| extensions.iter().any(|e| *e == ext))
}

#[cfg(unix)]
fn metadata_inode(metadata: &std::fs::Metadata) -> Option<u64> {
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn metadata_inode(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

/// Read one bounded window starting at the cursor.
///
/// Returns the bytes consumed and the non-blank lines in them. Without
/// `flush_partial` an unterminated tail stays unread, except when the window
/// is full and holds no newline at all.
async fn read_from(
    cursor: &mut FileCursor,
    max_read_bytes: u64,
    flush_partial: bool,
) -> std::io::Result<(u64, Vec<String>)> {
    let mut file = File::open(&cursor.path).await?;
    file.seek(SeekFrom::Start(cursor.offset)).await?;

    let mut buf = Vec::new();
    file.take(max_read_bytes).read_to_end(&mut buf).await?;
    if buf.is_empty() {
        return Ok((0, Vec::new()));
    }

    let complete = buf.iter().rposition(|b| *b == b'\n').map(|pos| pos + 1);
    let consumed = match complete {
        _ if flush_partial => buf.len(),
        Some(end) => end,
        None if buf.len() as u64 >= max_read_bytes => {
            log::warn!(
                "⚠️  No line break within {} bytes of {}, emitting window as one line",
                max_read_bytes,
                cursor.path.display()
            );
            buf.len()
        }
        None => 0,
    };

    cursor.offset += consumed as u64;
    Ok((consumed as u64, split_lines(&buf[..consumed])))
}

/// Read whatever is left of a finished file, including its last partial line
async fn drain(cursor: &mut FileCursor, max_read_bytes: u64) -> std::io::Result<Vec<String>> {
    let mut lines = Vec::new();
    loop {
        let (consumed, chunk) = read_from(cursor, max_read_bytes, false).await?;
        lines.extend(chunk);
        if consumed == 0 {
            break;
        }
    }
    let (_, tail) = read_from(cursor, max_read_bytes, true).await?;
    lines.extend(tail);
    Ok(lines)
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}
