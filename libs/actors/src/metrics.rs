//! Group Metrics
//!
//! Lock-free counters for message outcomes and pool thread churn.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Group-wide metrics
#[derive(Debug, Default)]
pub struct GroupMetrics {
    pub messages_sent: AtomicU64,
    pub messages_processed: AtomicU64,
    pub messages_failed: AtomicU64,
    pub messages_cancelled: AtomicU64,
    pub messages_coalesced: AtomicU64,
    pub total_processing_time_ns: AtomicU64,

    // Pool metrics
    pub threads_spawned: AtomicU64,
    pub threads_retired: AtomicU64,
    pub submissions: AtomicU64,
    pub overflow_submissions: AtomicU64,
}

impl GroupMetrics {
    pub fn record_message_handled(&self, duration: Duration, ok: bool) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.messages_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_processing_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self, count: u64) {
        self.messages_cancelled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn avg_processing_time_ns(&self) -> f64 {
        let count = self.messages_processed.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_processing_time_ns.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    /// Get metrics snapshot
    pub fn stats(&self) -> GroupStats {
        GroupStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            messages_cancelled: self.messages_cancelled.load(Ordering::Relaxed),
            messages_coalesced: self.messages_coalesced.load(Ordering::Relaxed),
            avg_processing_time_ns: self.avg_processing_time_ns(),
            threads_spawned: self.threads_spawned.load(Ordering::Relaxed),
            threads_retired: self.threads_retired.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
            overflow_submissions: self.overflow_submissions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`GroupMetrics`]
#[derive(Debug, Clone, Serialize)]
pub struct GroupStats {
    pub messages_sent: u64,
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub messages_cancelled: u64,
    pub messages_coalesced: u64,
    pub avg_processing_time_ns: f64,
    pub threads_spawned: u64,
    pub threads_retired: u64,
    pub submissions: u64,
    pub overflow_submissions: u64,
}

impl GroupStats {
    /// Threads currently alive according to spawn/retire counts
    pub fn live_threads(&self) -> u64 {
        self.threads_spawned.saturating_sub(self.threads_retired)
    }
}
