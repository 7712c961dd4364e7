use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::layout::Shape;

/// Live counters for one shape, shared by its queue, writer and compactions.
#[derive(Debug, Default)]
pub struct ShapeCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    rows_written: AtomicU64,
    batches_failed: AtomicU64,
    compactions: AtomicU64,
    compaction_failures: AtomicU64,
}

impl ShapeCounters {
    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rows_written(&self, rows: usize) {
        self.rows_written.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compaction_failure(&self) {
        self.compaction_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ShapeStats {
        ShapeStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            compaction_failures: self.compaction_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShapeStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub rows_written: u64,
    pub batches_failed: u64,
    pub compactions: u64,
    pub compaction_failures: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub runtime: ShapeStats,
    pub status: ShapeStats,
    pub followers: usize,
}

impl StoreStats {
    pub fn shape(&self, shape: Shape) -> &ShapeStats {
        match shape {
            Shape::Runtime => &self.runtime,
            Shape::Status => &self.status,
        }
    }
}
