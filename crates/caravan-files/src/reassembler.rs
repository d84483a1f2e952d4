//! Out-of-order chunk reassembly into a pre-allocated partial file.
//!
//! A [`ChunkReassembler`] owns three on-disk artifacts for one transfer:
//!
//! - `<name>.partial` - pre-allocated to the final size; chunks are written
//!   at `index * chunk_size` in whatever order they arrive
//! - `<name>.manifest` - text record of chunk completion, rewritten after
//!   every completed chunk
//! - `<name>` - the final file, produced by an atomic rename once every
//!   chunk has been written
//!
//! The manifest is persisted before a chunk write reports success. A crash
//! between the data write and the manifest write leaves the chunk marked
//! pending; it will be re-requested and rewritten, which is safe because
//! chunk writes are idempotent.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{ChunkError, Result};
use crate::fsutil::atomic_write;
use crate::manifest::ChunkManifest;

/// Reassembles one file from independently arriving chunks.
///
/// Chunk writes for the same transfer may come from concurrent tasks; the
/// write + manifest-persist pair is a single critical section behind an
/// internal lock. Distinct transfers never contend.
pub struct ChunkReassembler {
    transfer_id: String,
    file_name: String,
    total_size: u64,
    chunk_size: u64,
    total_chunks: u64,
    partial_path: PathBuf,
    manifest_path: PathBuf,
    final_path: PathBuf,
    state: Mutex<ReassemblyState>,
}

#[derive(Debug)]
struct ReassemblyState {
    manifest: ChunkManifest,
    finalized: bool,
    failed: bool,
    error_message: Option<String>,
}

impl ReassemblyState {
    fn fail(&mut self, message: String) {
        self.failed = true;
        self.error_message = Some(message);
    }

    fn clear_failure(&mut self) {
        self.failed = false;
        self.error_message = None;
    }
}

impl ChunkReassembler {
    /// Open a reassembler for `transfer_id`, resuming from an existing
    /// manifest when one is present.
    ///
    /// Starting fresh pre-allocates a zero-filled partial file of
    /// `total_size` bytes. A corrupt manifest, a manifest whose geometry
    /// disagrees with the arguments, or a manifest without its partial file
    /// all fall back to a fresh start; partial data still on disk is simply
    /// rewritten by later idempotent chunk writes.
    pub async fn open(
        transfer_id: impl Into<String>,
        file_name: &str,
        total_size: u64,
        chunk_size: u64,
        dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let transfer_id = transfer_id.into();
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;

        let partial_path = dir.join(format!("{file_name}.partial"));
        let manifest_path = dir.join(format!("{file_name}.manifest"));
        let final_path = dir.join(file_name);

        let mut manifest = match fs::read_to_string(&manifest_path).await {
            Ok(text) => match ChunkManifest::parse(&text) {
                Ok(m) if m.matches_geometry(total_size, chunk_size) => {
                    info!(
                        transfer_id = %transfer_id,
                        "resuming transfer: {}/{} chunks already complete",
                        m.completed_count(),
                        m.total_chunks()
                    );
                    m
                }
                Ok(_) => {
                    warn!(transfer_id = %transfer_id, "manifest geometry mismatch, starting fresh");
                    ChunkManifest::new(file_name, total_size, chunk_size)?
                }
                Err(e) => {
                    warn!(transfer_id = %transfer_id, "corrupt manifest ({e}), starting fresh");
                    ChunkManifest::new(file_name, total_size, chunk_size)?
                }
            },
            Err(_) => ChunkManifest::new(file_name, total_size, chunk_size)?,
        };

        if !partial_path.exists() {
            if manifest.completed_count() > 0 {
                warn!(
                    transfer_id = %transfer_id,
                    "partial file missing, discarding {} completed chunks",
                    manifest.completed_count()
                );
                manifest = ChunkManifest::new(file_name, total_size, chunk_size)?;
            }

            let file = fs::File::create(&partial_path).await?;
            file.set_len(total_size).await?;
            debug!(
                transfer_id = %transfer_id,
                "pre-allocated {} ({} bytes, {} chunks of {})",
                partial_path.display(),
                total_size,
                manifest.total_chunks(),
                chunk_size
            );
        }

        Ok(Self {
            transfer_id,
            file_name: file_name.to_string(),
            total_size,
            chunk_size,
            total_chunks: manifest.total_chunks(),
            partial_path,
            manifest_path,
            final_path,
            state: Mutex::new(ReassemblyState {
                manifest,
                finalized: false,
                failed: false,
                error_message: None,
            }),
        })
    }

    /// Write one chunk at its byte offset and durably record its completion.
    ///
    /// Re-writing an already-completed chunk is a no-op that returns success.
    /// When the last missing chunk lands, the partial file is promoted to the
    /// final name and the manifest removed. Returns whether the transfer is
    /// complete after this write.
    ///
    /// A disk error marks the transfer failed and leaves the chunk pending;
    /// retrying the same write after the condition clears is safe and resets
    /// the failure flag.
    pub async fn write_chunk(&self, index: u64, data: &[u8]) -> Result<bool> {
        let mut state = self.state.lock().await;

        if index >= self.total_chunks {
            return Err(ChunkError::InvalidChunkIndex {
                index,
                total: self.total_chunks,
            });
        }

        if state.manifest.is_chunk_complete(index) {
            debug!(
                transfer_id = %self.transfer_id,
                "chunk {index} already complete, skipping"
            );
            return Ok(state.manifest.is_complete());
        }

        let expected = state.manifest.chunk_len(index);
        if data.len() as u64 != expected {
            return Err(ChunkError::ChunkSizeMismatch {
                index,
                expected,
                actual: data.len() as u64,
            });
        }

        let offset = index * self.chunk_size;
        if let Err(e) = self.write_at(offset, data).await {
            let msg = format!("failed to write chunk {index} at offset {offset}: {e}");
            error!(transfer_id = %self.transfer_id, "{msg}");
            state.fail(msg.clone());
            return Err(ChunkError::Io(msg));
        }

        state.manifest.mark_complete(index);
        let text = state.manifest.render();
        if let Err(e) = atomic_write(&self.manifest_path, text.as_bytes()).await {
            // Completion is not durable; keep the chunk pending so a resume
            // re-requests it.
            state.manifest.mark_pending(index);
            let msg = format!("failed to persist manifest after chunk {index}: {e}");
            error!(transfer_id = %self.transfer_id, "{msg}");
            state.fail(msg.clone());
            return Err(ChunkError::Io(msg));
        }

        state.clear_failure();
        debug!(
            transfer_id = %self.transfer_id,
            "wrote chunk {index} ({} bytes at offset {offset}), {}/{} complete",
            data.len(),
            state.manifest.completed_count(),
            self.total_chunks
        );

        if state.manifest.is_complete() {
            self.finalize(&mut state).await?;
        }

        Ok(state.manifest.is_complete())
    }

    async fn write_at(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        // Opened per write, never created: once the partial file is deleted
        // out from under us the write fails cleanly instead of resurrecting
        // the file.
        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.partial_path)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    /// Promote the partial file to its final name and drop the manifest.
    async fn finalize(&self, state: &mut ReassemblyState) -> Result<()> {
        info!(
            transfer_id = %self.transfer_id,
            "all {} chunks complete, finalizing {}",
            self.total_chunks,
            self.final_path.display()
        );

        // A stale final file from an earlier run would make the rename
        // behave differently across platforms; drop it first.
        if self.final_path.exists() {
            let _ = fs::remove_file(&self.final_path).await;
        }

        if let Err(e) = fs::rename(&self.partial_path, &self.final_path).await {
            let msg = format!(
                "failed to promote {} to {}: {e}",
                self.partial_path.display(),
                self.final_path.display()
            );
            error!(transfer_id = %self.transfer_id, "{msg}");
            state.fail(msg.clone());
            return Err(ChunkError::Finalize(msg));
        }

        state.finalized = true;
        if let Err(e) = fs::remove_file(&self.manifest_path).await {
            warn!(
                transfer_id = %self.transfer_id,
                "could not remove manifest {}: {e}",
                self.manifest_path.display()
            );
        }

        info!(
            transfer_id = %self.transfer_id,
            "transfer complete: {}",
            self.final_path.display()
        );
        Ok(())
    }

    /// Lowest-index chunk still pending, or `None` when all chunks are done.
    /// Deterministic ascending order, for caller-driven re-request loops.
    pub async fn next_missing_chunk(&self) -> Option<u64> {
        self.state.lock().await.manifest.next_missing()
    }

    /// All pending chunk indices in ascending order
    pub async fn missing_chunks(&self) -> Vec<u64> {
        self.state.lock().await.manifest.missing_chunks()
    }

    /// Check if a chunk has already been completed
    pub async fn is_chunk_complete(&self, index: u64) -> bool {
        self.state.lock().await.manifest.is_chunk_complete(index)
    }

    /// Check if every chunk has been written
    pub async fn is_complete(&self) -> bool {
        self.state.lock().await.manifest.is_complete()
    }

    /// Whether the partial file has been promoted to its final name
    pub async fn is_finalized(&self) -> bool {
        self.state.lock().await.finalized
    }

    /// Whether the most recent operation failed
    pub async fn is_failed(&self) -> bool {
        self.state.lock().await.failed
    }

    /// Error message of the most recent failure, if any
    pub async fn error_message(&self) -> Option<String> {
        self.state.lock().await.error_message.clone()
    }

    /// Number of completed chunks
    pub async fn completed_chunks(&self) -> u64 {
        self.state.lock().await.manifest.completed_count()
    }

    /// Completion percentage (0-100), floored
    pub async fn percent_complete(&self) -> u8 {
        self.state.lock().await.manifest.percent_complete()
    }

    /// Bytes downloaded so far, approximated as `completed * chunk_size`.
    ///
    /// Over-counts by up to `chunk_size - 1` once the trailing short chunk
    /// has been written; the value is monotonic and cheap, not exact.
    pub async fn downloaded_bytes(&self) -> u64 {
        self.state.lock().await.manifest.completed_count() * self.chunk_size
    }

    /// Completion bitmap for exchanging resume state with a sender
    pub async fn chunk_bitmap(&self) -> Vec<u8> {
        self.state.lock().await.manifest.chunk_bitmap()
    }

    /// Transfer id this reassembler serves
    #[must_use]
    pub fn transfer_id(&self) -> &str {
        &self.transfer_id
    }

    /// File name the transfer finalizes to
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Authoritative target size in bytes
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Fixed chunk size in bytes (last chunk may be shorter)
    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Total number of chunks
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Path of the in-progress partial file
    #[must_use]
    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    /// Path of the durable manifest
    #[must_use]
    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Path the completed file is promoted to
    #[must_use]
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }
}
