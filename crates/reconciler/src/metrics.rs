//! Synchronization counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Process-wide reconciliation counters.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    applications_processed: AtomicU64,
    applications_failed: AtomicU64,
    retries: AtomicU64,
    deployments: AtomicU64,
    resources_generated: AtomicU64,
    commits: AtomicU64,
    commit_micros: AtomicU64,
}

/// Point-in-time copy of [`SyncMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub applications_processed: u64,
    pub applications_failed: u64,
    pub retries: u64,
    pub deployments: u64,
    pub resources_generated: u64,
    pub commits: u64,
    pub commit_duration_ms: u64,
}

impl SyncMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn application_processed(&self) {
        self.applications_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn application_failed(&self) {
        self.applications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deployment(&self) {
        self.deployments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resources_generated(&self, count: usize) {
        self.resources_generated
            .fetch_add(u64::try_from(count).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// Record one executed commit and how long it took.
    pub fn commit(&self, elapsed: Duration) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.commit_micros.fetch_add(
            u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            applications_processed: self.applications_processed.load(Ordering::Relaxed),
            applications_failed: self.applications_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            deployments: self.deployments.load(Ordering::Relaxed),
            resources_generated: self.resources_generated.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            commit_duration_ms: self.commit_micros.load(Ordering::Relaxed) / 1000,
        }
    }
}
