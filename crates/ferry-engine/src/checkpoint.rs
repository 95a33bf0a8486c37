//! Append-only checkpoint and error logs
//!
//! A checkpoint directory holds two UTF-8 logs with one record per line:
//!
//! - `completed.log`: the id of every unit that succeeded
//! - `errors.log`: `ERROR:<id>: <cause>` for every unit that failed for good
//!
//! In the error log, `%` and the `": "` separator inside an id are written as
//! `%25` and `%3A ` so the first `": "` always ends the id.
//!
//! Each record is a single append-mode write, so concurrent workers never
//! interleave within a line. Duplicate records collapse when loaded. A line
//! without its terminating newline is the remnant of an interrupted write and
//! never counts.

use crate::error::CheckpointError;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const COMPLETED_LOG: &str = "completed.log";
pub const ERRORS_LOG: &str = "errors.log";

const ERROR_LEVEL: &str = "ERROR";
const TAIL_SCAN_BYTES: usize = 8192;

pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Everything the logs record, loaded into memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointState {
    pub completed: HashSet<String>,
    /// Unit id to the cause of its last recorded failure
    pub failed: HashMap<String, String>,
    /// Lines read from `completed.log`, duplicates included
    pub completed_records: u64,
    /// Lines read from `errors.log`, duplicates included
    pub error_records: u64,
}

impl CheckpointState {
    /// Read a checkpoint directory without opening it for writing
    pub async fn read(dir: impl AsRef<Path>) -> CheckpointResult<Self> {
        let dir = dir.as_ref();
        let mut state = Self::default();

        for id in read_records(&dir.join(COMPLETED_LOG)).await? {
            state.completed_records += 1;
            state.completed.insert(id);
        }

        for line in read_records(&dir.join(ERRORS_LOG)).await? {
            state.error_records += 1;
            match parse_error_line(&line) {
                Some((id, cause)) => {
                    state.failed.insert(id.into_owned(), cause.to_string());
                }
                None => warn!(line = %line, "Skipping unparseable error log line"),
            }
        }

        Ok(state)
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.completed.contains(id)
    }

    pub fn is_failed(&self, id: &str) -> bool {
        self.failed.contains_key(id)
    }

    /// Failed ids that no later run has completed, sorted
    pub fn outstanding_failures(&self) -> Vec<(&str, &str)> {
        let mut failures: Vec<_> = self
            .failed
            .iter()
            .filter(|(id, _)| !self.completed.contains(*id))
            .map(|(id, cause)| (id.as_str(), cause.as_str()))
            .collect();
        failures.sort_unstable();
        failures
    }
}

/// Handle on an open checkpoint directory, shared by all workers of a run
#[derive(Debug)]
pub struct Checkpoint {
    dir: PathBuf,
    completed: LogFile,
    errors: LogFile,
}

#[derive(Debug)]
struct LogFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl LogFile {
    async fn open(path: PathBuf) -> CheckpointResult<Self> {
        if let Some(dropped) = truncate_torn_tail(&path)
            .await
            .map_err(|e| CheckpointError::io(&path, e))?
        {
            warn!(path = %path.display(), bytes = dropped, "Discarded torn record at end of log");
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| CheckpointError::io(&path, e))?;

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    async fn write_line(&self, line: String) -> CheckpointResult<()> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(CheckpointError::Closed)?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))?;
        file.flush().await.map_err(|e| CheckpointError::io(&self.path, e))
    }

    async fn close(&self) -> CheckpointResult<()> {
        if let Some(mut file) = self.file.lock().await.take() {
            file.flush().await.map_err(|e| CheckpointError::io(&self.path, e))?;
            file.sync_all().await.map_err(|e| CheckpointError::io(&self.path, e))?;
        }
        Ok(())
    }
}

impl Checkpoint {
    /// Open (creating if needed) the checkpoint logs in `dir`
    pub async fn open(dir: impl AsRef<Path>) -> CheckpointResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CheckpointError::io(&dir, e))?;

        let completed = LogFile::open(dir.join(COMPLETED_LOG)).await?;
        let errors = LogFile::open(dir.join(ERRORS_LOG)).await?;

        debug!(dir = %dir.display(), "Checkpoint opened");
        Ok(Self {
            dir,
            completed,
            errors,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read both logs in full
    pub async fn load(&self) -> CheckpointResult<CheckpointState> {
        let state = CheckpointState::read(&self.dir).await?;
        info!(
            completed = state.completed.len(),
            failed = state.failed.len(),
            "Checkpoint loaded"
        );
        Ok(state)
    }

    /// Record a completed unit
    pub async fn append(&self, id: &str) -> CheckpointResult<()> {
        validate_id(id)?;
        self.completed.write_line(format!("{}\n", id)).await
    }

    /// Record a unit that failed for good
    pub async fn append_error(&self, id: &str, cause: &str) -> CheckpointResult<()> {
        validate_id(id)?;
        let cause = cause.replace(['\n', '\r'], " ");
        self.errors
            .write_line(format!("{}:{}: {}\n", ERROR_LEVEL, escape_id(id), cause))
            .await
    }

    /// Flush and release both logs; later appends fail with [`CheckpointError::Closed`]
    pub async fn close(&self) -> CheckpointResult<()> {
        self.completed.close().await?;
        self.errors.close().await
    }
}

fn validate_id(id: &str) -> CheckpointResult<()> {
    if id.is_empty() || id.contains(['\n', '\r']) {
        return Err(CheckpointError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn escape_id(id: &str) -> Cow<'_, str> {
    if id.contains('%') || id.contains(": ") {
        Cow::Owned(id.replace('%', "%25").replace(": ", "%3A "))
    } else {
        Cow::Borrowed(id)
    }
}

/// Split `LEVEL:<id>: <cause>` into the unescaped id and the cause
fn parse_error_line(line: &str) -> Option<(Cow<'_, str>, &str)> {
    let (_level, rest) = line.split_once(':')?;
    let (id, cause) = rest.split_once(": ").unwrap_or((rest, ""));
    if id.is_empty() {
        return None;
    }
    let id = if id.contains('%') {
        urlencoding::decode(id).ok()?
    } else {
        Cow::Borrowed(id)
    };
    Some((id, cause))
}

/// Complete, non-empty lines of a log; a missing file has none
async fn read_records(path: &Path) -> CheckpointResult<Vec<String>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CheckpointError::io(path, e)),
    };

    let mut lines: Vec<&[u8]> = bytes.split(|&b| b == b'\n').collect();
    // split leaves whatever follows the final newline as the last element
    if let Some(fragment) = lines.pop() {
        if !fragment.is_empty() {
            warn!(
                path = %path.display(),
                bytes = fragment.len(),
                "Ignoring unterminated record at end of log"
            );
        }
    }

    Ok(lines
        .into_iter()
        .map(|line| String::from_utf8_lossy(line).trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

/// Cut an unterminated final record off a log, returning the bytes removed
async fn truncate_torn_tail(path: &Path) -> std::io::Result<Option<u64>> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let len = file.metadata().await?.len();
    let mut buf = vec![0u8; TAIL_SCAN_BYTES];
    let mut end = len;

    while end > 0 {
        let start = end.saturating_sub(TAIL_SCAN_BYTES as u64);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(chunk).await?;

        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            let keep = start + pos as u64 + 1;
            if keep == len {
                return Ok(None);
            }
            file.set_len(keep).await?;
            return Ok(Some(len - keep));
        }
        end = start;
    }

    if len == 0 {
        return Ok(None);
    }
    file.set_len(0).await?;
    Ok(Some(len))
}
