//! Cross-crate integration tests: chunk reassembly driving the transfer
//! queue, restart recovery, and cleanup.

use caravan_core::{TransferRegistry, TransferStatus, TransferStore};
use caravan_files::{ChunkError, ChunkReassembler, ReassemblerRegistry};
use caravan_integration_tests::chunk_payload;
use tempfile::TempDir;

const TOTAL: u64 = 10_000;
const CHUNK: u64 = 4096;

/// A transport worker delivering chunks out of order while reporting
/// progress to the queue, ending with a finalized file and a completed
/// queue entry.
#[tokio::test]
async fn chunk_transfer_drives_queue_to_completion() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("collections");
    let registry = TransferRegistry::new(dir.path().join("queue.json"), &root);
    let reassemblers = ReassemblerRegistry::new();

    let id = "col1/acme.zip";
    registry.get_or_create(id, "acme.zip", TOTAL).await.unwrap();

    let r = reassemblers
        .open(id, "acme.zip", TOTAL, CHUNK, root.join("col1"))
        .await
        .unwrap();

    for index in [2, 0, 1] {
        r.write_chunk(index, &chunk_payload(TOTAL, CHUNK, index))
            .await
            .unwrap();
        registry
            .update_progress(id, r.downloaded_bytes().await)
            .await
            .unwrap();
    }

    assert!(r.is_finalized().await);
    registry.mark_completed(id).await.unwrap();
    reassemblers.remove(id);

    let status = registry.get(id).unwrap();
    assert!(status.is_completed());
    assert_eq!(status.percent_complete(), 100);
    // The approximation counts full chunks, over-counting the short tail.
    assert_eq!(status.downloaded_bytes(), 3 * CHUNK);

    let final_file = root.join("col1/acme.zip");
    assert_eq!(std::fs::metadata(&final_file).unwrap().len(), TOTAL);
    assert!(!root.join("col1/acme.zip.partial").exists());
    assert!(!root.join("col1/acme.zip.manifest").exists());
}

/// Chunks {0, 2, 5} survive a restart; the re-request loop yields exactly
/// the complement, lowest index first, and never a completed chunk.
#[tokio::test]
async fn resumption_yields_exactly_the_missing_chunks() {
    let dir = TempDir::new().unwrap();
    let total = 8 * CHUNK;

    {
        let r = ChunkReassembler::open("col1/big.iso", "big.iso", total, CHUNK, dir.path())
            .await
            .unwrap();
        for index in [0, 2, 5] {
            r.write_chunk(index, &chunk_payload(total, CHUNK, index))
                .await
                .unwrap();
        }
    }

    // Process restart: a new reassembler picks the manifest back up.
    let r = ChunkReassembler::open("col1/big.iso", "big.iso", total, CHUNK, dir.path())
        .await
        .unwrap();
    assert_eq!(r.completed_chunks().await, 3);
    assert_eq!(r.missing_chunks().await, vec![1, 3, 4, 6, 7]);

    let mut served = Vec::new();
    while let Some(index) = r.next_missing_chunk().await {
        served.push(index);
        r.write_chunk(index, &chunk_payload(total, CHUNK, index))
            .await
            .unwrap();
    }

    assert_eq!(served, vec![1, 3, 4, 6, 7]);
    assert!(r.is_finalized().await);
}

/// Queue snapshot says "active", but the transport finished the file right
/// before the crash; reload promotes the entry instead of re-downloading.
#[tokio::test]
async fn reload_promotes_finished_transfer() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("collections");
    let store_path = dir.path().join("queue.json");

    let mut status = TransferStatus::new("col1/movie.mp4", "movie.mp4", 1_000_000);
    status.update_progress(999_000);
    assert!(!status.is_completed());
    TransferStore::new(&store_path)
        .save(&[status])
        .await
        .unwrap();

    let target_dir = root.join("col1");
    std::fs::create_dir_all(&target_dir).unwrap();
    std::fs::write(target_dir.join("movie.mp4"), vec![0u8; 999_500]).unwrap();

    let registry = TransferRegistry::new(&store_path, &root);
    assert_eq!(registry.load().await.unwrap(), 1);

    let status = registry.get("col1/movie.mp4").unwrap();
    assert!(status.is_completed());
}

/// Cancelling a chunk transfer mid-flight removes its artifacts, prunes the
/// directories it emptied, and leaves the scope boundary in place; the
/// still-running writer fails cleanly afterwards.
#[tokio::test]
async fn cancel_cleans_up_and_stops_writer() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("collections");
    let registry = TransferRegistry::new(dir.path().join("queue.json"), &root);

    let id = "col1/camp/2025/pack.zip";
    registry.get_or_create(id, "pack.zip", TOTAL).await.unwrap();

    let r = ChunkReassembler::open(id, "pack.zip", TOTAL, CHUNK, root.join("col1/camp/2025"))
        .await
        .unwrap();
    r.write_chunk(0, &chunk_payload(TOTAL, CHUNK, 0))
        .await
        .unwrap();

    registry.delete_and_cleanup(id).await.unwrap();

    assert!(!root.join("col1/camp").exists());
    assert!(root.join("col1").exists());
    assert!(!registry.contains(id));

    let err = r
        .write_chunk(1, &chunk_payload(TOTAL, CHUNK, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, ChunkError::Io(_)));
    assert!(r.is_failed().await);
}

/// Pause and resume round-trip across a registry restart without touching
/// byte counters.
#[tokio::test]
async fn pause_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("collections");
    let store_path = dir.path().join("queue.json");

    {
        let registry = TransferRegistry::new(&store_path, &root);
        registry
            .get_or_create("col1/doc.pdf", "doc.pdf", 5000)
            .await
            .unwrap();
        registry.update_progress("col1/doc.pdf", 2000).await.unwrap();
        registry.pause_all().await.unwrap();
    }

    let registry = TransferRegistry::new(&store_path, &root);
    registry.load().await.unwrap();

    let status = registry.get("col1/doc.pdf").unwrap();
    assert!(status.is_paused());
    assert_eq!(status.downloaded_bytes(), 2000);

    registry.resume_all().await.unwrap();
    let status = registry.get("col1/doc.pdf").unwrap();
    assert!(!status.is_paused());
    assert_eq!(status.downloaded_bytes(), 2000);
}

/// Two workers hammering the same reassembler concurrently: every chunk
/// lands once, the file finalizes exactly once.
#[tokio::test]
async fn concurrent_writers_same_transfer() {
    let dir = TempDir::new().unwrap();
    let total = 16 * CHUNK;
    let reassemblers = std::sync::Arc::new(ReassemblerRegistry::new());

    let r = reassemblers
        .open("col1/par.bin", "par.bin", total, CHUNK, dir.path())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for worker in 0..2 {
        let r = std::sync::Arc::clone(&r);
        handles.push(tokio::spawn(async move {
            // Both workers try every chunk; duplicates are no-ops.
            for index in 0..16u64 {
                let index = if worker == 0 { index } else { 15 - index };
                r.write_chunk(index, &chunk_payload(total, CHUNK, index))
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert!(r.is_complete().await);
    assert!(r.is_finalized().await);
    assert_eq!(
        std::fs::metadata(dir.path().join("par.bin")).unwrap().len(),
        total
    );
}
