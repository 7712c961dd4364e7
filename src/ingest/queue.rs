use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::layout::Shape;
use crate::stats::ShapeCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// Queue full; the record was discarded.
    Dropped,
    /// The writer has shut down.
    Closed,
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, EnqueueOutcome::Accepted)
    }
}

/// Rate-limited "queue full" warnings. The first drop warns immediately;
/// later ones are folded into the next warning once `interval` has passed.
#[derive(Debug)]
pub struct DropCounter {
    shape: Shape,
    interval: Duration,
    state: Mutex<DropState>,
}

#[derive(Debug, Default)]
struct DropState {
    last_logged: Option<Instant>,
    unreported: u64,
}

impl DropCounter {
    pub fn new(shape: Shape, interval: Duration) -> Self {
        Self {
            shape,
            interval,
            state: Mutex::new(DropState::default()),
        }
    }

    /// Count one drop. When this call emits the warning, returns the number
    /// of drops it reported, i.e. those since the previous warning.
    pub fn record(&self) -> Option<u64> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.unreported += 1;
        let due = state
            .last_logged
            .map_or(true, |at| at.elapsed() >= self.interval);
        if !due {
            return None;
        }
        let reported = std::mem::take(&mut state.unreported);
        log::warn!(
            "{} buffer full, dropping rows (dropped={reported})",
            self.shape
        );
        state.last_logged = Some(Instant::now());
        Some(reported)
    }
}

/// Producer side of one shape's bounded queue. Never blocks.
pub struct IngestQueue<R> {
    tx: mpsc::Sender<R>,
    counters: Arc<ShapeCounters>,
    drops: DropCounter,
}

impl<R> IngestQueue<R> {
    pub fn new(
        shape: Shape,
        tx: mpsc::Sender<R>,
        counters: Arc<ShapeCounters>,
        drop_log_interval: Duration,
    ) -> Self {
        Self {
            tx,
            counters,
            drops: DropCounter::new(shape, drop_log_interval),
        }
    }

    pub fn offer(&self, record: R) -> EnqueueOutcome {
        match self.tx.try_send(record) {
            Ok(()) => {
                self.counters.record_enqueued();
                EnqueueOutcome::Accepted
            }
            Err(TrySendError::Full(_)) => {
                self.counters.record_dropped();
                self.drops.record();
                EnqueueOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    pub fn counters(&self) -> &Arc<ShapeCounters> {
        &self.counters
    }
}
