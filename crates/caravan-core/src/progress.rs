//! Per-transfer progress records.
//!
//! A [`TransferStatus`] tracks one whole-file transfer: byte counts, rate,
//! ETA, and the pause/complete/fail flags a UI polls. Records serialize into
//! the queue snapshot, so timestamps are epoch milliseconds rather than
//! process-local instants.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch
pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Progress record for one whole-file transfer.
///
/// State machine: active until [`mark_completed`](Self::mark_completed) or
/// [`mark_failed`](Self::mark_failed); the paused flag applies only while
/// active. Fields stay private so `percent_complete` can never drift from
/// `downloaded_bytes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferStatus {
    id: String,
    display_name: String,
    total_bytes: u64,
    downloaded_bytes: u64,
    percent_complete: u8,
    started_at: u64,
    last_update_at: u64,
    bytes_per_second: u64,
    completed: bool,
    failed: bool,
    paused: bool,
    error_message: Option<String>,
}

impl TransferStatus {
    /// Create a fresh record for `id`, with nothing downloaded yet
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, total_bytes: u64) -> Self {
        let now = epoch_millis();
        Self {
            id: id.into(),
            display_name: display_name.into(),
            total_bytes,
            downloaded_bytes: 0,
            percent_complete: 0,
            started_at: now,
            last_update_at: now,
            bytes_per_second: 0,
            completed: false,
            failed: false,
            paused: false,
            error_message: None,
        }
    }

    /// Record a new cumulative byte count and recompute rate and percentage.
    ///
    /// The rate derives from the delta against the previous call; calls
    /// landing within the same millisecond keep the previous rate. Callers
    /// must supply non-decreasing values (one worker drives one transfer);
    /// a decrease clamps the rate to zero rather than going negative.
    pub fn update_progress(&mut self, new_downloaded_bytes: u64) {
        let now = epoch_millis();
        let time_delta = now.saturating_sub(self.last_update_at);

        if time_delta > 0 {
            let bytes_delta = new_downloaded_bytes.saturating_sub(self.downloaded_bytes);
            self.bytes_per_second = bytes_delta * 1000 / time_delta;
        }

        self.downloaded_bytes = new_downloaded_bytes;
        self.last_update_at = now;
        self.percent_complete = if self.total_bytes > 0 {
            ((self.downloaded_bytes as u128 * 100) / self.total_bytes as u128) as u8
        } else {
            0
        };
    }

    /// Mark the transfer complete; idempotent
    pub fn mark_completed(&mut self) {
        self.completed = true;
        self.percent_complete = 100;
    }

    /// Mark the transfer failed, keeping its byte counters for inspection
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.failed = true;
        self.error_message = Some(message.into());
    }

    /// Pause the transfer; no-op once completed or failed
    pub fn pause(&mut self) {
        if !self.completed && !self.failed {
            self.paused = true;
        }
    }

    /// Resume a paused transfer; no-op once completed or failed
    pub fn resume(&mut self) {
        if !self.completed && !self.failed {
            self.paused = false;
        }
    }

    /// Estimated time to completion from the current rate, or `None` while
    /// the rate is unknown or the transfer is already done
    #[must_use]
    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        if self.bytes_per_second > 0 && self.downloaded_bytes < self.total_bytes {
            let remaining = self.total_bytes - self.downloaded_bytes;
            Some(Duration::from_millis(
                remaining * 1000 / self.bytes_per_second,
            ))
        } else {
            None
        }
    }

    /// Wall time since the record was created
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(epoch_millis().saturating_sub(self.started_at))
    }

    /// Human-readable rate, e.g. `"1.50 MiB/s"`
    #[must_use]
    pub fn speed_string(&self) -> String {
        format!("{}/s", format_bytes(self.bytes_per_second))
    }

    /// Human-readable progress, e.g. `"512.00 KiB / 2.00 MiB"`
    #[must_use]
    pub fn progress_string(&self) -> String {
        format!(
            "{} / {}",
            format_bytes(self.downloaded_bytes),
            format_bytes(self.total_bytes)
        )
    }

    /// Stable transfer id (`"<ownerScope>/<relativePath>"` by convention)
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name shown to the user
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Authoritative target size in bytes
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Cumulative bytes downloaded
    #[must_use]
    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes
    }

    /// Completion percentage (0-100), floored
    #[must_use]
    pub fn percent_complete(&self) -> u8 {
        self.percent_complete
    }

    /// Most recently observed rate in bytes per second
    #[must_use]
    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second
    }

    /// Creation timestamp, epoch milliseconds
    #[must_use]
    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    /// Timestamp of the last progress update, epoch milliseconds
    #[must_use]
    pub fn last_update_at(&self) -> u64 {
        self.last_update_at
    }

    /// Whether the transfer finished successfully
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Whether the transfer failed
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Whether the transfer is paused
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether the transfer reached a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.completed || self.failed
    }

    /// Failure description, set iff the transfer failed
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Overwrite the activity timestamp (stall-sweep reset, tests)
    pub(crate) fn set_last_update_at(&mut self, at_millis: u64) {
        self.last_update_at = at_millis;
    }
}

/// Format a byte count with binary units
fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b < KIB {
        format!("{bytes} B")
    } else if b < MIB {
        format!("{:.2} KiB", b / KIB)
    } else if b < GIB {
        format!("{:.2} MiB", b / MIB)
    } else {
        format!("{:.2} GiB", b / GIB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_status() {
        let s = TransferStatus::new("col/a.bin", "a.bin", 1000);
        assert_eq!(s.downloaded_bytes(), 0);
        assert_eq!(s.percent_complete(), 0);
        assert!(!s.is_terminal());
        assert!(!s.is_paused());
        assert!(s.error_message().is_none());
    }

    #[test]
    fn test_progress_monotonic_percent() {
        let mut s = TransferStatus::new("col/a.bin", "a.bin", 1_000_000);
        let mut last_percent = 0;
        for bytes in [1, 10_000, 333_333, 500_000, 999_999, 1_000_000] {
            s.update_progress(bytes);
            assert_eq!(
                s.percent_complete() as u64,
                bytes * 100 / 1_000_000,
                "floor percentage at {bytes} bytes"
            );
            assert!(s.percent_complete() >= last_percent);
            last_percent = s.percent_complete();
        }
        assert_eq!(s.percent_complete(), 100);
    }

    #[test]
    fn test_progress_unknown_total() {
        let mut s = TransferStatus::new("col/a.bin", "a.bin", 0);
        s.update_progress(5000);
        assert_eq!(s.percent_complete(), 0);
    }

    #[test]
    fn test_rate_from_delta() {
        let mut s = TransferStatus::new("col/a.bin", "a.bin", 1_000_000);
        // 100_000 bytes over 100 ms = 1_000_000 B/s
        s.set_last_update_at(epoch_millis() - 100);
        s.update_progress(100_000);
        let rate = s.bytes_per_second();
        assert!(
            (900_000..=1_100_000).contains(&rate),
            "rate {rate} should be near 1 MB/s"
        );
    }

    #[test]
    fn test_rate_clamps_on_decrease() {
        let mut s = TransferStatus::new("col/a.bin", "a.bin", 1_000_000);
        s.set_last_update_at(epoch_millis() - 100);
        s.update_progress(100_000);
        s.set_last_update_at(epoch_millis() - 100);
        s.update_progress(50_000);
        assert_eq!(s.bytes_per_second(), 0);
        assert_eq!(s.downloaded_bytes(), 50_000);
    }

    #[test]
    fn test_eta() {
        let mut s = TransferStatus::new("col/a.bin", "a.bin", 1_000_000);
        s.set_last_update_at(epoch_millis() - 1000);
        s.update_progress(500_000);
        // ~500_000 B/s, 500_000 bytes left => ~1s
        let eta = s.estimated_time_remaining().unwrap();
        assert!(eta >= Duration::from_millis(800) && eta <= Duration::from_millis(1200));
    }

    #[test]
    fn test_eta_unknown_without_rate() {
        let s = TransferStatus::new("col/a.bin", "a.bin", 1000);
        assert!(s.estimated_time_remaining().is_none());
    }

    #[test]
    fn test_mark_completed_forces_percent() {
        let mut s = TransferStatus::new("col/a.bin", "a.bin", 1000);
        s.update_progress(400);
        s.mark_completed();
        assert!(s.is_completed());
        assert_eq!(s.percent_complete(), 100);
        // idempotent
        s.mark_completed();
        assert!(s.is_completed());
    }

    #[test]
    fn test_mark_failed_keeps_bytes() {
        let mut s = TransferStatus::new("col/a.bin", "a.bin", 1000);
        s.update_progress(400);
        s.mark_failed("peer vanished");
        assert!(s.is_failed());
        assert_eq!(s.downloaded_bytes(), 400);
        assert_eq!(s.error_message(), Some("peer vanished"));
    }

    #[test]
    fn test_pause_resume_preserves_bytes() {
        let mut s = TransferStatus::new("col/a.bin", "a.bin", 1000);
        s.update_progress(250);
        let before = s.downloaded_bytes();

        s.pause();
        assert!(s.is_paused());
        s.resume();
        assert!(!s.is_paused());
        assert_eq!(s.downloaded_bytes(), before);
        assert_eq!(s.percent_complete(), 25);
    }

    #[test]
    fn test_terminal_states_cannot_pause() {
        let mut s = TransferStatus::new("col/a.bin", "a.bin", 1000);
        s.mark_completed();
        s.pause();
        assert!(!s.is_paused());

        let mut s = TransferStatus::new("col/b.bin", "b.bin", 1000);
        s.mark_failed("nope");
        s.pause();
        assert!(!s.is_paused());
    }

    #[test]
    fn test_format_strings() {
        let mut s = TransferStatus::new("col/a.bin", "a.bin", 2 * 1024 * 1024);
        s.set_last_update_at(epoch_millis() - 1000);
        s.update_progress(512 * 1024);
        assert_eq!(s.progress_string(), "512.00 KiB / 2.00 MiB");
        assert!(s.speed_string().ends_with("/s"));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut s = TransferStatus::new("col/a.bin", "a.bin", 1000);
        s.update_progress(300);
        s.pause();

        let json = serde_json::to_string(&s).unwrap();
        let back: TransferStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), s.id());
        assert_eq!(back.downloaded_bytes(), 300);
        assert!(back.is_paused());
    }
}
