//! Process counters surfaced by the health endpoint

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    extractions_succeeded: AtomicU64,
    extractions_failed: AtomicU64,
    downloads_completed: AtomicU64,
    downloads_failed: AtomicU64,
    stale_selections: AtomicU64,
    files_purged: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extraction_succeeded(&self) {
        self.extractions_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "extractions_succeeded", "Metric incremented");
    }

    pub fn extraction_failed(&self) {
        self.extractions_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "extractions_failed", "Metric incremented");
    }

    pub fn download_completed(&self) {
        self.downloads_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "downloads_completed", "Metric incremented");
    }

    pub fn download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "downloads_failed", "Metric incremented");
    }

    pub fn stale_selection(&self) {
        self.stale_selections.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "stale_selections", "Metric incremented");
    }

    pub fn files_purged(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.files_purged.fetch_add(count, Ordering::Relaxed);
        tracing::debug!(counter = "files_purged", count, "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            extractions_succeeded: self.extractions_succeeded.load(Ordering::Relaxed),
            extractions_failed: self.extractions_failed.load(Ordering::Relaxed),
            downloads_completed: self.downloads_completed.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            stale_selections: self.stale_selections.load(Ordering::Relaxed),
            files_purged: self.files_purged.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub extractions_succeeded: u64,
    pub extractions_failed: u64,
    pub downloads_completed: u64,
    pub downloads_failed: u64,
    pub stale_selections: u64,
    pub files_purged: u64,
}
