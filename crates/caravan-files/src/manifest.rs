//! Chunk manifest: durable record of which chunks of a transfer are complete.
//!
//! The manifest is a plain-text, human-diffable file rewritten in full on
//! every chunk completion. Chunk counts are bounded (small files, small
//! chunk sizes), so durability wins over write amplification here.
//!
//! ```text
//! filename=acme.zip
//! totalSize=102400
//! chunkSize=10240
//! totalChunks=10
//! chunk0=complete,0-10239
//! chunk1=pending,10240-20479
//! ...
//! ```

use std::collections::HashSet;

use crate::error::{ChunkError, Result};

/// Chunk completion state plus the geometry needed to render the manifest.
///
/// A chunk index is in the completed set iff its byte range in the partial
/// file has been fully written at least once. The set survives restarts via
/// [`render`](Self::render) / [`parse`](Self::parse).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkManifest {
    file_name: String,
    total_size: u64,
    chunk_size: u64,
    total_chunks: u64,
    completed: HashSet<u64>,
}

impl ChunkManifest {
    /// Create a fresh manifest with no completed chunks.
    ///
    /// The last chunk may be shorter than `chunk_size`; every other chunk is
    /// exactly `chunk_size` bytes.
    pub fn new(file_name: impl Into<String>, total_size: u64, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ChunkError::Geometry("chunk size must be non-zero".into()));
        }
        if total_size == 0 {
            return Err(ChunkError::Geometry("cannot transfer an empty file".into()));
        }

        Ok(Self {
            file_name: file_name.into(),
            total_size,
            chunk_size,
            total_chunks: total_size.div_ceil(chunk_size),
            completed: HashSet::new(),
        })
    }

    /// File name the transfer will finalize to
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

    /// Check whether a loaded manifest matches the geometry a caller expects
    #[must_use]
    pub fn matches_geometry(&self, total_size: u64, chunk_size: u64) -> bool {
        self.total_size == total_size && self.chunk_size == chunk_size
    }

    /// Exact byte length of the chunk at `index`
    #[must_use]
    pub fn chunk_len(&self, index: u64) -> u64 {
        let start = index * self.chunk_size;
        self.chunk_size.min(self.total_size - start)
    }

    /// Inclusive byte range `(start, end)` of the chunk at `index`
    #[must_use]
    pub fn chunk_range(&self, index: u64) -> (u64, u64) {
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total_size) - 1;
        (start, end)
    }

    /// Mark a chunk as completed; returns false if it already was
    pub fn mark_complete(&mut self, index: u64) -> bool {
        self.completed.insert(index)
    }

    /// Return a chunk to pending (used when persisting its completion failed)
    pub fn mark_pending(&mut self, index: u64) {
        self.completed.remove(&index);
    }

    /// Check if a chunk is completed
    #[must_use]
    pub fn is_chunk_complete(&self, index: u64) -> bool {
        self.completed.contains(&index)
    }

    /// Number of completed chunks
    #[must_use]
    pub fn completed_count(&self) -> u64 {
        self.completed.len() as u64
    }

    /// Check if every chunk is complete
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed.len() as u64 == self.total_chunks
    }

    /// Lowest-index chunk still pending, for re-request scheduling
    #[must_use]
    pub fn next_missing(&self) -> Option<u64> {
        (0..self.total_chunks).find(|i| !self.completed.contains(i))
    }

    /// All pending chunk indices in ascending order
    #[must_use]
    pub fn missing_chunks(&self) -> Vec<u64> {
        (0..self.total_chunks)
            .filter(|i| !self.completed.contains(i))
            .collect()
    }

    /// Completion percentage (0-100), floored
    #[must_use]
    pub fn percent_complete(&self) -> u8 {
        if self.total_chunks == 0 {
            return 100;
        }
        ((self.completed.len() as u128 * 100) / self.total_chunks as u128) as u8
    }

    /// Compact completion bitmap, one bit per chunk (LSB-first within a
    /// byte), suitable for exchanging resume state with a remote sender
    #[must_use]
    pub fn chunk_bitmap(&self) -> Vec<u8> {
        let mut bitmap = vec![0u8; (self.total_chunks as usize).div_ceil(8)];
        for &index in &self.completed {
            bitmap[(index / 8) as usize] |= 1 << (index % 8);
        }
        bitmap
    }

    /// Replace the completion set from a bitmap previously produced by
    /// [`chunk_bitmap`](Self::chunk_bitmap). Bits beyond `total_chunks` are
    /// ignored.
    pub fn apply_bitmap(&mut self, bitmap: &[u8]) {
        self.completed.clear();
        for (byte_index, &byte) in bitmap.iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    let index = (byte_index * 8 + bit) as u64;
                    if index < self.total_chunks {
                        self.completed.insert(index);
                    }
                }
            }
        }
    }

    /// Render the manifest text, header first, then one line per chunk.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("filename={}\n", self.file_name));
        out.push_str(&format!("totalSize={}\n", self.total_size));
        out.push_str(&format!("chunkSize={}\n", self.chunk_size));
        out.push_str(&format!("totalChunks={}\n", self.total_chunks));

        for i in 0..self.total_chunks {
            let (start, end) = self.chunk_range(i);
            let status = if self.completed.contains(&i) {
                "complete"
            } else {
                "pending"
            };
            out.push_str(&format!("chunk{i}={status},{start}-{end}\n"));
        }

        out
    }

    /// Parse manifest text produced by [`render`](Self::render).
    ///
    /// Header keys are required and must be self-consistent. Chunk lines are
    /// best-effort: malformed lines and out-of-range indices are skipped, and
    /// only well-formed `complete` entries mark completion. Callers treat a
    /// parse error as "start fresh".
    pub fn parse(text: &str) -> Result<Self> {
        let mut file_name: Option<String> = None;
        let mut total_size: Option<u64> = None;
        let mut chunk_size: Option<u64> = None;
        let mut total_chunks: Option<u64> = None;
        let mut completed = HashSet::new();

        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };

            match key {
                "filename" => file_name = Some(value.to_string()),
                "totalSize" => {
                    total_size = Some(value.parse().map_err(|_| {
                        ChunkError::Manifest(format!("bad totalSize: {value}"))
                    })?);
                }
                "chunkSize" => {
                    chunk_size = Some(value.parse().map_err(|_| {
                        ChunkError::Manifest(format!("bad chunkSize: {value}"))
                    })?);
                }
                "totalChunks" => {
                    total_chunks = Some(value.parse().map_err(|_| {
                        ChunkError::Manifest(format!("bad totalChunks: {value}"))
                    })?);
                }
                k if k.starts_with("chunk") => {
                    let Ok(index) = k["chunk".len()..].parse::<u64>() else {
                        continue;
                    };
                    if value.starts_with("complete,") {
                        completed.insert(index);
                    }
                }
                _ => {}
            }
        }

        let file_name =
            file_name.ok_or_else(|| ChunkError::Manifest("missing filename".into()))?;
        let total_size =
            total_size.ok_or_else(|| ChunkError::Manifest("missing totalSize".into()))?;
        let chunk_size =
            chunk_size.ok_or_else(|| ChunkError::Manifest("missing chunkSize".into()))?;
        let total_chunks =
            total_chunks.ok_or_else(|| ChunkError::Manifest("missing totalChunks".into()))?;

        let mut manifest = Self::new(file_name, total_size, chunk_size)?;
        if manifest.total_chunks != total_chunks {
            return Err(ChunkError::Manifest(format!(
                "totalChunks={} disagrees with derived count {}",
                total_chunks, manifest.total_chunks
            )));
        }

        completed.retain(|i| *i < manifest.total_chunks);
        manifest.completed = completed;
        Ok(manifest)
    }
}
