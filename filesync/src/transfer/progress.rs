//! Per-pass transfer accounting.
//!
//! Transfer tasks record into a shared [`PassProgress`]; once every task has
//! settled the orchestrator takes a [`PassSummary`] snapshot and logs it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Which way a pass moves files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Push,
    Clone,
}

impl Direction {
    fn verb(&self) -> &'static str {
        match self {
            Direction::Push => "uploaded",
            Direction::Clone => "downloaded",
        }
    }
}

/// Counters shared by every task of one pass
pub struct PassProgress {
    direction: Direction,
    start_time: Instant,
    total_files: usize,
    total_bytes: u64,
    files_transferred: AtomicUsize,
    bytes_transferred: AtomicU64,
    deletions_applied: AtomicUsize,
    deletions_skipped: AtomicUsize,
}

impl PassProgress {
    pub fn new(direction: Direction, total_files: usize, total_bytes: u64) -> Self {
        Self {
            direction,
            start_time: Instant::now(),
            total_files,
            total_bytes,
            files_transferred: AtomicUsize::new(0),
            bytes_transferred: AtomicU64::new(0),
            deletions_applied: AtomicUsize::new(0),
            deletions_skipped: AtomicUsize::new(0),
        }
    }

    /// Count one finished file and log it with the running total.
    pub fn file_done(&self, path: &str, bytes: u64) {
        let done = self.files_transferred.fetch_add(1, Ordering::Relaxed) + 1;
        let total_bytes = self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let percent = if self.total_bytes > 0 {
            ((total_bytes as f64 / self.total_bytes as f64) * 100.0).min(100.0)
        } else {
            100.0
        };
        info!(
            "[{}/{}] {} {} ({}, {:.0}%)",
            done,
            self.total_files,
            self.direction.verb(),
            path,
            format_bytes(bytes),
            percent
        );
    }

    /// Count one deletion; `applied` is false when the remote file was already gone.
    pub fn deletion_done(&self, path: &str, applied: bool) {
        if applied {
            self.deletions_applied.fetch_add(1, Ordering::Relaxed);
            info!("Deleted {}", path);
        } else {
            self.deletions_skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn summary(&self) -> PassSummary {
        PassSummary {
            direction: self.direction,
            files_transferred: self.files_transferred.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            deletions_applied: self.deletions_applied.load(Ordering::Relaxed),
            deletions_skipped: self.deletions_skipped.load(Ordering::Relaxed),
            duration: self.start_time.elapsed(),
        }
    }
}

/// Outcome of a completed pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub direction: Direction,
    pub files_transferred: usize,
    pub bytes_transferred: u64,
    pub deletions_applied: usize,
    pub deletions_skipped: usize,
    pub duration: Duration,
}

impl PassSummary {
    /// Average speed over the whole pass
    pub fn bytes_per_second(&self) -> u64 {
        let elapsed = self.duration.as_secs_f64();
        if elapsed > 0.0 {
            (self.bytes_transferred as f64 / elapsed) as u64
        } else {
            0
        }
    }

    pub fn log(&self) {
        info!(
            "{} {} files ({}) in {} at {}, {} deletions applied, {} already absent",
            match self.direction {
                Direction::Push => "Pushed",
                Direction::Clone => "Cloned",
            },
            self.files_transferred,
            format_bytes(self.bytes_transferred),
            format_duration(self.duration.as_secs()),
            format_speed(self.bytes_per_second()),
            self.deletions_applied,
            self.deletions_skipped
        );
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
