//! # Caravan Core
//!
//! Transfer-queue tracking for resumable mesh downloads.
//!
//! This crate provides:
//! - Per-transfer progress records (bytes, rate, ETA, pause/fail flags)
//! - A durable, process-wide transfer registry with atomic JSON snapshots
//! - Restart reconciliation against the filesystem
//! - Caller-driven stall detection with automatic retry nudges
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   TransferRegistry                       │
//! │   (id -> TransferStatus, persisted on every mutation)   │
//! ├─────────────────────────────────────────────────────────┤
//! │   TransferStatus        │        TransferStore          │
//! │   (progress record)     │   (atomic JSON snapshot)      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Transport workers report progress through the registry; UIs observe it by
//! polling. The crate never spawns workers of its own.
//!
//! # Example
//!
//! ```no_run
//! use caravan_core::TransferRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = TransferRegistry::new("queue.json", "collections");
//!     registry.load().await?;
//!
//!     registry.get_or_create("col1/photo.jpg", "photo.jpg", 250_000).await?;
//!     registry.update_progress("col1/photo.jpg", 4096).await?;
//!
//!     // Invoked from the caller's poll loop, e.g. once per second.
//!     let nudged = registry.sweep_stalled().await?;
//!     println!("{} stalled transfers nudged", nudged.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod progress;
pub mod registry;
pub mod store;

pub use error::{Result, TransferError};
pub use progress::TransferStatus;
pub use registry::{QueueSummary, STALL_THRESHOLD, TERMINAL_RETENTION, TransferRegistry};
pub use store::TransferStore;
