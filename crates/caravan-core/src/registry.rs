//! Durable registry of whole-file transfers.
//!
//! The registry is the single queryable source of truth a UI polls: it owns
//! the `id -> TransferStatus` map, persists every externally observable
//! mutation, reconciles stale state after a restart, and nudges stalled
//! transfers. It is constructed once per process and passed by reference to
//! collaborators; there is no hidden global.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use dashmap::DashMap;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{Result, TransferError};
use crate::progress::{TransferStatus, epoch_millis};
use crate::store::TransferStore;

/// An active, unpaused transfer with a zero rate and no progress for this
/// long is considered stalled
pub const STALL_THRESHOLD: Duration = Duration::from_secs(60);

/// Terminal entries older than this are dropped when the queue is loaded
pub const TERMINAL_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Size slack allowed when matching an on-disk file against the expected
/// transfer size during restart reconciliation (1%)
const SIZE_TOLERANCE_DIVISOR: u64 = 100;

/// Aggregate queue view for a status line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSummary {
    /// Transfers neither terminal nor paused
    pub active: usize,
    /// Paused transfers
    pub paused: usize,
    /// Bytes still to download across all non-terminal transfers
    pub remaining_bytes: u64,
    /// Sum of the per-transfer ETAs currently known, if any
    pub eta: Option<Duration>,
}

/// Process-wide, persisted map of transfer id to [`TransferStatus`].
///
/// Transfer ids follow the `"<ownerScope>/<relativePath>"` convention; the
/// path part resolves against `collections_root` for cleanup and restart
/// reconciliation. Ids without a `/` have no on-disk location and skip
/// filesystem work.
///
/// Every mutating operation persists a full snapshot before returning, so a
/// crash loses at most the in-flight update, never a committed transition.
pub struct TransferRegistry {
    downloads: DashMap<String, TransferStatus>,
    store: TransferStore,
    collections_root: PathBuf,
}

impl TransferRegistry {
    /// Create a registry persisting to `store_path`, resolving transfer ids
    /// under `collections_root`. Call [`load`](Self::load) afterwards to
    /// restore a previous session's queue.
    #[must_use]
    pub fn new(store_path: impl Into<PathBuf>, collections_root: impl Into<PathBuf>) -> Self {
        Self {
            downloads: DashMap::new(),
            store: TransferStore::new(store_path),
            collections_root: collections_root.into(),
        }
    }

    /// Return the status for `id`, registering a fresh record if none
    /// exists. An existing record is returned untouched; the supplied name
    /// and size only seed new entries.
    pub async fn get_or_create(
        &self,
        id: &str,
        display_name: &str,
        total_bytes: u64,
    ) -> Result<TransferStatus> {
        if id.is_empty() {
            return Err(TransferError::InvalidId("empty id".into()));
        }

        let mut created = false;
        let status = {
            let entry = self.downloads.entry(id.to_string()).or_insert_with(|| {
                created = true;
                TransferStatus::new(id, display_name, total_bytes)
            });
            entry.value().clone()
        };

        if created {
            info!(transfer_id = %id, "queued download {display_name} ({total_bytes} bytes)");
            self.save().await?;
        }
        Ok(status)
    }

    /// Record a new cumulative byte count for `id` and persist
    pub async fn update_progress(&self, id: &str, downloaded_bytes: u64) -> Result<()> {
        {
            let mut entry = self
                .downloads
                .get_mut(id)
                .ok_or_else(|| TransferError::NotFound(id.to_string()))?;
            entry.update_progress(downloaded_bytes);
        }
        self.save().await
    }

    /// Mark `id` complete and persist
    pub async fn mark_completed(&self, id: &str) -> Result<()> {
        {
            let mut entry = self
                .downloads
                .get_mut(id)
                .ok_or_else(|| TransferError::NotFound(id.to_string()))?;
            entry.mark_completed();
        }
        info!(transfer_id = %id, "download completed");
        self.save().await
    }

    /// Mark `id` failed with a description and persist
    pub async fn mark_failed(&self, id: &str, message: &str) -> Result<()> {
        {
            let mut entry = self
                .downloads
                .get_mut(id)
                .ok_or_else(|| TransferError::NotFound(id.to_string()))?;
            entry.mark_failed(message);
        }
        warn!(transfer_id = %id, "download failed: {message}");
        self.save().await
    }

    /// Pause `id` (no-op if terminal) and persist
    pub async fn pause(&self, id: &str) -> Result<()> {
        {
            let mut entry = self
                .downloads
                .get_mut(id)
                .ok_or_else(|| TransferError::NotFound(id.to_string()))?;
            entry.pause();
        }
        self.save().await
    }

    /// Resume `id` (no-op if terminal) and persist
    pub async fn resume(&self, id: &str) -> Result<()> {
        {
            let mut entry = self
                .downloads
                .get_mut(id)
                .ok_or_else(|| TransferError::NotFound(id.to_string()))?;
            entry.resume();
        }
        self.save().await
    }

    /// Pause every non-terminal transfer, persisting once
    pub async fn pause_all(&self) -> Result<()> {
        for mut entry in self.downloads.iter_mut() {
            entry.pause();
        }
        self.save().await
    }

    /// Resume every non-terminal transfer, persisting once
    pub async fn resume_all(&self) -> Result<()> {
        for mut entry in self.downloads.iter_mut() {
            entry.resume();
        }
        self.save().await
    }

    /// Drop all completed and failed entries; returns how many were removed
    pub async fn clear_completed(&self) -> Result<usize> {
        let before = self.downloads.len();
        self.downloads.retain(|_, status| !status.is_terminal());
        let removed = before - self.downloads.len();

        if removed > 0 {
            debug!("cleared {removed} finished transfers");
        }
        self.save().await?;
        Ok(removed)
    }

    /// Stop tracking `id` without touching its files
    pub async fn remove(&self, id: &str) -> Result<Option<TransferStatus>> {
        let removed = self.downloads.remove(id).map(|(_, status)| status);
        self.save().await?;
        Ok(removed)
    }

    /// Delete the on-disk artifacts for `id` (final file, `.part` sidecar,
    /// chunk-path `.partial`/`.manifest`), prune now-empty parent
    /// directories up to the owner-scope boundary, and drop the entry.
    ///
    /// The walk never removes the boundary directory itself, even when it
    /// ends up empty. Safe to call while a writer is mid-transfer: the
    /// writer's next write fails cleanly.
    pub async fn delete_and_cleanup(&self, id: &str) -> Result<()> {
        if let Some((boundary, target)) = self.resolve(id)? {
            remove_file_logged(&target).await;
            for suffix in [".part", ".partial", ".manifest"] {
                remove_file_logged(&append_suffix(&target, suffix)).await;
            }

            if let Some(parent) = target.parent() {
                delete_empty_parents(parent, &boundary).await;
            }
        }

        self.downloads.remove(id);
        self.save().await
    }

    /// Restore the queue from the snapshot store.
    ///
    /// Terminal entries past the retention window are dropped. Entries
    /// persisted as active are checked against the filesystem: when the
    /// target file already exists at (within 1% of) its expected size, the
    /// transport finished before the crash and the entry is promoted to
    /// completed. Returns the number of entries restored.
    pub async fn load(&self) -> Result<usize> {
        let records = match self.store.load().await {
            Ok(records) => records,
            Err(TransferError::Serialization(e)) => {
                warn!("corrupt queue snapshot ({e}), starting empty");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let now = epoch_millis();
        let retention = TERMINAL_RETENTION.as_millis() as u64;
        let mut loaded = 0;
        let mut expired = 0;
        let mut reconciled = 0;

        for mut status in records {
            let age = now.saturating_sub(status.last_update_at());
            if status.is_terminal() && age > retention {
                expired += 1;
                continue;
            }

            // A record persisted as active may have finished right before
            // the process died; trust the file on disk over the stale flag.
            if !status.is_terminal() && self.file_looks_complete(&status).await {
                info!(
                    transfer_id = %status.id(),
                    "target file already on disk, promoting to completed"
                );
                status.mark_completed();
                reconciled += 1;
            }

            self.downloads.insert(status.id().to_string(), status);
            loaded += 1;
        }

        info!("restored {loaded} transfers ({expired} expired, {reconciled} reconciled)");
        Ok(loaded)
    }

    /// Persist a full snapshot of the queue
    pub async fn save(&self) -> Result<()> {
        let records = self.all();
        self.store.save(&records).await
    }

    /// Nudge stalled transfers: any active, unpaused entry with a zero rate
    /// and no update for [`STALL_THRESHOLD`] gets a pause+resume cycle and a
    /// fresh activity timestamp so it is not re-nudged on the next sweep.
    /// Returns the ids nudged. Callers drive this on their own cadence.
    pub async fn sweep_stalled(&self) -> Result<Vec<String>> {
        let now = epoch_millis();
        let threshold = STALL_THRESHOLD.as_millis() as u64;
        let mut nudged = Vec::new();

        for mut entry in self.downloads.iter_mut() {
            if entry.is_terminal() || entry.is_paused() {
                continue;
            }
            let idle = now.saturating_sub(entry.last_update_at());
            if idle > threshold && entry.bytes_per_second() == 0 {
                warn!(
                    transfer_id = %entry.id(),
                    "no progress for {idle} ms, nudging transport"
                );
                entry.pause();
                entry.resume();
                entry.set_last_update_at(now);
                nudged.push(entry.id().to_string());
            }
        }

        if !nudged.is_empty() {
            self.save().await?;
        }
        Ok(nudged)
    }

    /// Aggregate counts, remaining bytes, and combined ETA over the queue
    #[must_use]
    pub fn summary(&self) -> QueueSummary {
        let mut summary = QueueSummary::default();
        let mut eta_total = Duration::ZERO;
        let mut have_eta = false;

        for entry in self.downloads.iter() {
            if entry.is_terminal() {
                continue;
            }
            if entry.is_paused() {
                summary.paused += 1;
            } else {
                summary.active += 1;
            }
            summary.remaining_bytes += entry.total_bytes().saturating_sub(entry.downloaded_bytes());
            if let Some(eta) = entry.estimated_time_remaining() {
                eta_total += eta;
                have_eta = true;
            }
        }

        summary.eta = have_eta.then_some(eta_total);
        summary
    }

    /// Current status of `id`, if tracked
    #[must_use]
    pub fn get(&self, id: &str) -> Option<TransferStatus> {
        self.downloads.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every tracked transfer
    #[must_use]
    pub fn all(&self) -> Vec<TransferStatus> {
        self.downloads.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Snapshot of every non-terminal transfer (candidates for resuming)
    #[must_use]
    pub fn incomplete(&self) -> Vec<TransferStatus> {
        self.downloads
            .iter()
            .filter(|entry| !entry.is_terminal())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Whether `id` is tracked
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.downloads.contains_key(id)
    }

    /// Number of tracked transfers
    #[must_use]
    pub fn len(&self) -> usize {
        self.downloads.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty()
    }

    /// Resolve a transfer id to `(scope boundary, target file path)`.
    ///
    /// Ids without a `/` carry no location and resolve to `None`. A `..` or
    /// empty component anywhere in the id is a hard error; nothing may
    /// escape the collections root.
    fn resolve(&self, id: &str) -> Result<Option<(PathBuf, PathBuf)>> {
        let Some((scope, rel)) = id.split_once('/') else {
            return Ok(None);
        };
        if scope.is_empty() || rel.is_empty() {
            return Err(TransferError::InvalidId(id.to_string()));
        }

        let scope_ok = matches!(
            Path::new(scope).components().next(),
            Some(Component::Normal(_))
        ) && Path::new(scope).components().count() == 1;
        let rel_ok = Path::new(rel)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !scope_ok || !rel_ok {
            return Err(TransferError::InvalidId(id.to_string()));
        }

        let boundary = self.collections_root.join(scope);
        let target = boundary.join(rel);
        Ok(Some((boundary, target)))
    }

    /// Whether the target file for `status` exists at its expected size
    /// (within 1%), meaning the transfer actually finished
    async fn file_looks_complete(&self, status: &TransferStatus) -> bool {
        let Ok(Some((_, target))) = self.resolve(status.id()) else {
            return false;
        };
        let Ok(meta) = fs::metadata(&target).await else {
            return false;
        };
        if !meta.is_file() {
            return false;
        }

        let expected = status.total_bytes();
        meta.len().abs_diff(expected) <= expected / SIZE_TOLERANCE_DIVISOR
    }
}

/// Remove a file if present, logging rather than failing; cleanup is best
/// effort and the registry entry goes away regardless
async fn remove_file_logged(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_file(path).await {
        Ok(()) => info!("deleted {}", path.display()),
        Err(e) => warn!("failed to delete {}: {e}", path.display()),
    }
}

/// Walk upward from `start`, removing empty directories, stopping at (and
/// never removing) `boundary`
async fn delete_empty_parents(start: &Path, boundary: &Path) {
    let mut dir = start.to_path_buf();
    while dir != boundary && dir.starts_with(boundary) && dir.exists() {
        match is_empty_dir(&dir).await {
            Ok(true) => {
                if fs::remove_dir(&dir).await.is_err() {
                    break;
                }
                debug!("removed empty directory {}", dir.display());
                match dir.parent() {
                    Some(parent) => dir = parent.to_path_buf(),
                    None => break,
                }
            }
            _ => break,
        }
    }
}

async fn is_empty_dir(dir: &Path) -> std::io::Result<bool> {
    let mut entries = fs::read_dir(dir).await?;
    Ok(entries.next_entry().await?.is_none())
}

/// Append `suffix` to the full file name (`acme.zip` -> `acme.zip.part`)
fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
