//! Durable queue snapshots.
//!
//! The whole queue is small (one entry per pending source file), so it is
//! persisted as a single JSON document rewritten after every mutation via
//! temp file and rename.

use super::{JobId, Lease, QueueError, TilingJob};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const SNAPSHOT_VERSION: u32 = 1;

/// Serialized queue contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Format version
    pub version: u32,
    /// Next id to hand out
    pub next_id: JobId,
    /// Next insertion sequence number
    pub next_seq: u64,
    /// Most recent claim lease handed out
    #[serde(default)]
    pub last_lease: Lease,
    /// Queued and claimed jobs
    pub active: Vec<TilingJob>,
    /// Terminally failed jobs
    pub failed: Vec<TilingJob>,
}

/// Reads and writes [`QueueSnapshot`]s at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Create a store for the given file. Nothing is read yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, reason: impl ToString) -> QueueError {
        QueueError::Persistence {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    /// Load the snapshot, or `None` if the file does not exist yet.
    pub fn load(&self) -> Result<Option<QueueSnapshot>, QueueError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error(e)),
        };
        let snapshot: QueueSnapshot = serde_json::from_slice(&bytes).map_err(|e| self.error(e))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(self.error(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    /// Replace the snapshot on disk.
    pub fn save(&self, snapshot: &QueueSnapshot) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.error(e))?;
            }
        }

        let mut snapshot_json = serde_json::to_vec(&QueueSnapshot {
            version: SNAPSHOT_VERSION,
            ..snapshot.clone()
        })
        .map_err(|e| self.error(e))?;
        snapshot_json.push(b'\n');

        let temp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp).map_err(|e| self.error(e))?;
        file.write_all(&snapshot_json)
            .and_then(|_| file.sync_all())
            .map_err(|e| self.error(e))?;
        drop(file);

        fs::rename(&temp, &self.path).map_err(|e| self.error(e))
    }
}
