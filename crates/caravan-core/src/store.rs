//! Durable snapshot store for the transfer queue.
//!
//! The whole queue serializes as one JSON document written atomically
//! (temp + rename), so a crash mid-save leaves the previous snapshot intact
//! rather than a half-written store.

use std::path::{Path, PathBuf};

use caravan_files::fsutil::atomic_write;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, TransferError};
use crate::progress::TransferStatus;

/// Persists the full set of [`TransferStatus`] records at a fixed path.
///
/// Saves are full-snapshot writes serialized behind an internal lock;
/// callers may save from any task.
pub struct TransferStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TransferStore {
    /// Create a store backed by `path` (not created until the first save)
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the snapshot file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a full snapshot of `records`
    pub async fn save(&self, records: &[TransferStatus]) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let json = serde_json::to_string_pretty(records)
            .map_err(|e| TransferError::Serialization(e.to_string()))?;
        atomic_write(&self.path, json.as_bytes()).await?;

        debug!(
            "saved {} transfers to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Read the snapshot back; a missing file is an empty queue
    pub async fn load(&self) -> Result<Vec<TransferStatus>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let text = fs::read_to_string(&self.path).await?;
        serde_json::from_str(&text).map_err(|e| TransferError::Serialization(e.to_string()))
    }
}
