use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use duckdb::Connection;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};
use crate::event::normalize_timestamp;
use crate::layout::{HourBucket, Shape};
use crate::stats::ShapeCounters;
use crate::storage::{Compactor, HotRow};

/// Single consumer of one shape's queue.
///
/// Owns the pending batch and the "current hour". When a record from any other
/// hour arrives, earlier or later, the batch is flushed and the current hour is
/// handed to the compactor before the record is accepted.
pub struct BatchWriter<R: HotRow> {
    conn: Connection,
    compactor: Arc<Compactor>,
    counters: Arc<ShapeCounters>,
    batch: Vec<R>,
    batch_size: usize,
    current_hour: Option<HourBucket>,
}

impl<R: HotRow> BatchWriter<R> {
    pub fn new(
        conn: Connection,
        compactor: Arc<Compactor>,
        counters: Arc<ShapeCounters>,
        batch_size: usize,
    ) -> Self {
        Self {
            conn,
            compactor,
            counters,
            batch: Vec::with_capacity(batch_size),
            batch_size,
            current_hour: None,
        }
    }

    pub fn current_hour(&self) -> Option<HourBucket> {
        self.current_hour
    }

    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    pub fn accept(&mut self, mut record: R) {
        let ts = normalize_timestamp(record.timestamp());
        record.set_timestamp(ts);
        let bucket = HourBucket::containing(ts);

        match self.current_hour {
            None => self.current_hour = Some(bucket),
            Some(current) if bucket != current => {
                self.flush();
                if let Err(err) = self
                    .compactor
                    .spawn_hour::<R>(current, Arc::clone(&self.counters))
                {
                    self.counters.record_compaction_failure();
                    log::error!("{} failed to start compaction of {current}: {err}", R::SHAPE);
                }
                self.current_hour = Some(bucket);
            }
            Some(_) => {}
        }

        self.batch.push(record);
        if self.batch.len() >= self.batch_size {
            self.flush();
        }
    }

    /// Write the pending batch. A failed batch is logged, counted and discarded.
    pub fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let rows = self.batch.len();
        match R::insert_batch(&mut self.conn, &self.batch) {
            Ok(()) => self.counters.record_rows_written(rows),
            Err(err) => {
                self.counters.record_batch_failed();
                log::error!("{} batch of {rows} rows failed: {err}", R::SHAPE);
            }
        }
        self.batch.clear();
    }
}

/// Consume `rx` until shutdown or until every sender is gone, flushing on
/// each tick. On shutdown the queue is drained before the final flush.
pub async fn run_batch_writer<R: HotRow>(
    mut writer: BatchWriter<R>,
    mut rx: mpsc::Receiver<R>,
    mut shutdown: oneshot::Receiver<()>,
    flush_interval: Duration,
) {
    let mut tick = tokio::time::interval(flush_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(record) => writer.accept(record),
                None => break,
            },
            _ = tick.tick() => writer.flush(),
            _ = &mut shutdown => {
                rx.close();
                while let Ok(record) = rx.try_recv() {
                    writer.accept(record);
                }
                break;
            }
        }
    }

    writer.flush();
    log::debug!("{} writer stopped", R::SHAPE);
}

pub struct WriterHandle {
    shape: Shape,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WriterHandle {
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Signal shutdown and wait for the drain. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| Error::Worker(format!("{} writer thread panicked", self.shape)))?;
        }
        Ok(())
    }
}

/// Run `writer` on a dedicated thread with its own current-thread runtime.
pub fn spawn_batch_writer<R: HotRow>(
    writer: BatchWriter<R>,
    rx: mpsc::Receiver<R>,
    flush_interval: Duration,
) -> Result<WriterHandle> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let thread = std::thread::Builder::new()
        .name(format!("{}-writer", R::SHAPE))
        .spawn(move || {
            rt.block_on(run_batch_writer(writer, rx, shutdown_rx, flush_interval));
        })?;

    Ok(WriterHandle {
        shape: R::SHAPE,
        shutdown: Some(shutdown_tx),
        thread: Some(thread),
    })
}
