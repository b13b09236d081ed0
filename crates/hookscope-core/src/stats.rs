//! Ingestion counters shared between the tailer and the health endpoint.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Sentinel stored in `last_accepted_at` before anything was accepted.
const NEVER: i64 = i64::MIN;

/// Lock-free ingestion counters.
///
/// Every failure mode of the pipeline degrades to "skip, count,
/// continue"; these counters are where the counting happens.
#[derive(Debug)]
pub struct IngestStats {
    lines_read: AtomicU64,
    malformed_lines: AtomicU64,
    rejected: AtomicU64,
    accepted: AtomicU64,
    last_accepted_at: AtomicI64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounters {
    /// Complete lines read from log files.
    pub lines_read: u64,
    /// Lines that failed to parse as JSON.
    pub malformed_lines: u64,
    /// Records rejected by the validator.
    pub rejected: u64,
    /// Events accepted into the window.
    pub accepted: u64,
    /// Epoch milliseconds of the last acceptance, if any.
    pub last_accepted_at: Option<i64>,
}

impl IngestStats {
    /// Create zeroed counters.
    pub const fn new() -> Self {
        Self {
            lines_read: AtomicU64::new(0),
            malformed_lines: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            last_accepted_at: AtomicI64::new(NEVER),
        }
    }

    /// Count complete lines read from a log file.
    pub fn record_lines(&self, n: u64) {
        self.lines_read.fetch_add(n, Ordering::Relaxed);
    }

    /// Count one line that was not valid JSON.
    pub fn record_malformed(&self) {
        self.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one record rejected by the validator.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Count `n` events accepted into the window at `now_ms`.
    pub fn record_accepted(&self, n: u64, now_ms: i64) {
        if n == 0 {
            return;
        }
        self.accepted.fetch_add(n, Ordering::Relaxed);
        self.last_accepted_at.store(now_ms, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters.
    pub fn counters(&self) -> IngestCounters {
        let last = self.last_accepted_at.load(Ordering::Relaxed);
        IngestCounters {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            last_accepted_at: (last != NEVER).then_some(last),
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}
