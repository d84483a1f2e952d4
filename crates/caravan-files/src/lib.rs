//! # Caravan Files
//!
//! Chunk-level reassembly engine for resumable transfers.
//!
//! This crate provides:
//! - Durable chunk manifests with resume support
//! - Out-of-order chunk writes into a pre-allocated partial file
//! - Atomic promotion of completed transfers to their final name
//! - A process-wide registry of active reassemblers
//!
//! ## Lifecycle
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  open()          load manifest or pre-allocate partial file  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  write_chunk()   seek + write, mark complete, persist        │
//! │                  manifest (any arrival order, idempotent)    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  finalize        rename partial -> final, drop manifest      │
//! │                  (automatic once the last chunk lands)       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod fsutil;
pub mod manifest;
pub mod reassembler;
pub mod registry;

pub use error::{ChunkError, Result};
pub use manifest::ChunkManifest;
pub use reassembler::ChunkReassembler;
pub use registry::ReassemblerRegistry;

/// Default chunk size (4 KiB), sized for small-MTU transports such as BLE
pub const DEFAULT_CHUNK_SIZE: u64 = 4096;
