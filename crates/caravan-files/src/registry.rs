//! Process-wide registry of active chunk reassemblers.
//!
//! One registry instance is constructed at startup and handed by reference
//! to every transport worker; there is no hidden global.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::Result;
use crate::reassembler::ChunkReassembler;

/// Lookup table of in-flight chunk transfers, keyed by transfer id.
///
/// Reads are lock-free; [`open`](Self::open) is safe to call from
/// concurrent tasks for the same id and hands every caller the same
/// instance.
#[derive(Default)]
pub struct ReassemblerRegistry {
    active: DashMap<String, Arc<ChunkReassembler>>,
}

impl ReassemblerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the reassembler for `transfer_id`, creating (or resuming from an
    /// on-disk manifest) if it is not yet tracked.
    pub async fn open(
        &self,
        transfer_id: &str,
        file_name: &str,
        total_size: u64,
        chunk_size: u64,
        dir: impl AsRef<Path>,
    ) -> Result<Arc<ChunkReassembler>> {
        if let Some(existing) = self.active.get(transfer_id) {
            return Ok(Arc::clone(&existing));
        }

        let built = Arc::new(
            ChunkReassembler::open(transfer_id, file_name, total_size, chunk_size, dir).await?,
        );

        // Two tasks may reach here for the same id; the first insertion wins
        // and the loser's instance is dropped. Both opened the same manifest
        // and partial file, so the discarded one has no side effects.
        let entry = self.active.entry(transfer_id.to_string()).or_insert(built);
        debug!(transfer_id = %transfer_id, "reassembler registered");
        Ok(Arc::clone(&entry))
    }

    /// Look up an active transfer without creating it
    #[must_use]
    pub fn get(&self, transfer_id: &str) -> Option<Arc<ChunkReassembler>> {
        self.active.get(transfer_id).map(|e| Arc::clone(&e))
    }

    /// Stop tracking a transfer (after completion or cancellation)
    pub fn remove(&self, transfer_id: &str) -> Option<Arc<ChunkReassembler>> {
        self.active.remove(transfer_id).map(|(_, r)| r)
    }

    /// Ids of all tracked transfers
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of tracked transfers
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no transfers are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
