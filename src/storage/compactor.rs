use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use duckdb::params;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::error::{Error, Result};
use crate::layout::{HourBucket, PartitionLayout, Shape};
use crate::stats::ShapeCounters;
use crate::storage::hot::{delete_hour, hour_end, hour_start, HotStore};
use crate::storage::rows::HotRow;
use crate::storage::sink::ParquetSink;

/// Hot rows converted per parquet write.
pub const COMPACT_CHUNK_ROWS: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// The hot store held no rows for the hour; nothing was written or removed.
    Skipped,
    Compacted {
        /// Rows in the published file.
        rows: usize,
        path: PathBuf,
        deleted: usize,
    },
}

/// Hours currently being compacted, one holder per (shape, hour).
#[derive(Debug, Default)]
struct HourLocks {
    held: Mutex<HashSet<(Shape, HourBucket)>>,
    released: Condvar,
}

impl HourLocks {
    fn acquire(&self, key: (Shape, HourBucket)) -> HourGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(&key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(key);
        HourGuard { locks: self, key }
    }
}

struct HourGuard<'a> {
    locks: &'a HourLocks,
    key: (Shape, HourBucket),
}

impl Drop for HourGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.key);
        self.locks.released.notify_all();
    }
}

/// Moves closed hours from the hot store into hour partitions.
pub struct Compactor {
    hot: Arc<HotStore>,
    layout: PartitionLayout,
    hours: HourLocks,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl Compactor {
    pub fn new(hot: Arc<HotStore>, layout: PartitionLayout) -> Self {
        Self {
            hot,
            layout,
            hours: HourLocks::default(),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    /// Copy `bucket`'s rows into its partition file, then delete them.
    ///
    /// Select and delete share one transaction, so rows committed after the
    /// snapshot (late arrivals for the same hour) are neither exported nor
    /// removed. The file is in place before the delete commits. When the hour
    /// already has a file, its rows are carried into the replacement ahead of
    /// the hot rows. Runs for the same hour and shape wait on each other.
    pub fn compact_hour<R: HotRow>(&self, bucket: HourBucket) -> Result<CompactionOutcome> {
        let _hour = self.hours.acquire((R::SHAPE, bucket));
        let dest = self.layout.file_path(R::SHAPE, bucket)?;

        let mut conn = self.hot.connect()?;
        let tx = conn.transaction()?;
        let sink = {
            let mut stmt = tx.prepare(&R::hour_sql())?;
            let mut rows = stmt.query(params![hour_start(bucket), hour_end(bucket)])?;
            let mut sink: Option<ParquetSink> = None;
            let mut chunk = Vec::with_capacity(COMPACT_CHUNK_ROWS);
            while let Some(row) = rows.next()? {
                chunk.push(R::from_row(row)?);
                if chunk.len() == COMPACT_CHUNK_ROWS {
                    write_chunk(&mut sink, &dest, &mut chunk)?;
                }
            }
            if !chunk.is_empty() {
                write_chunk(&mut sink, &dest, &mut chunk)?;
            }
            sink
        };
        let Some(sink) = sink else {
            tx.rollback()?;
            return Ok(CompactionOutcome::Skipped);
        };

        let total = sink.rows();
        let path = sink.publish()?;
        let deleted = delete_hour(&tx, R::SHAPE, bucket)?;
        tx.commit()?;
        Ok(CompactionOutcome::Compacted {
            rows: total,
            path,
            deleted,
        })
    }

    /// Run [`Compactor::compact_hour`] on its own thread. Failures are logged
    /// and counted; the hour's rows stay in the hot store.
    pub fn spawn_hour<R: HotRow>(
        self: &Arc<Self>,
        bucket: HourBucket,
        counters: Arc<ShapeCounters>,
    ) -> Result<()> {
        let compactor = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("compact-{}-{bucket}", R::SHAPE))
            .spawn(move || {
                log::info!("compacting {} hour {bucket}", R::SHAPE);
                match compactor.compact_hour::<R>(bucket) {
                    Ok(CompactionOutcome::Compacted { rows, path, deleted }) => {
                        counters.record_compaction();
                        log::info!(
                            "compacted {} hour {bucket}: {rows} rows -> {} ({deleted} deleted)",
                            R::SHAPE,
                            path.display()
                        );
                    }
                    Ok(CompactionOutcome::Skipped) => {
                        log::debug!("{} hour {bucket} empty, skipping compaction", R::SHAPE);
                    }
                    Err(err) => {
                        counters.record_compaction_failure();
                        log::error!("{} compaction of hour {bucket} failed: {err}", R::SHAPE);
                    }
                }
            })?;

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
        Ok(())
    }

    /// Block until every spawned compaction has finished.
    pub fn wait_idle(&self) -> Result<()> {
        let handles = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *pending)
        };
        let mut panicked = 0;
        for handle in handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(Error::Worker(format!("{panicked} compaction thread(s) panicked")));
        }
        Ok(())
    }
}

/// Write `chunk` and clear it. The first chunk opens the sink and copies the
/// hour's existing file into it.
fn write_chunk<R: HotRow>(
    sink: &mut Option<ParquetSink>,
    dest: &Path,
    chunk: &mut Vec<R>,
) -> Result<()> {
    if sink.is_none() {
        let mut fresh = ParquetSink::create(dest, R::arrow_schema())?;
        if dest.exists() {
            copy_existing(&mut fresh, dest, R::arrow_schema())?;
        }
        *sink = Some(fresh);
    }
    if let Some(sink) = sink.as_mut() {
        sink.write_batch(&R::to_record_batch(chunk)?)?;
    }
    chunk.clear();
    Ok(())
}

/// Stream an already published hour file into `sink`, re-stamped with `schema`.
fn copy_existing(sink: &mut ParquetSink, path: &Path, schema: SchemaRef) -> Result<()> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
    for batch in reader {
        let batch = batch?;
        sink.write_batch(&RecordBatch::try_new(Arc::clone(&schema), batch.columns().to_vec())?)?;
    }
    Ok(())
}
