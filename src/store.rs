use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::event::{
    normalize_timestamp, unix_millis, HydraChannel, Labels, MetricEvent, SnapshotState,
    StatusSnapshot, StatusUpdate,
};
use crate::follow::{FollowRegistry, Follower, Sample};
use crate::ingest::{spawn_batch_writer, BatchWriter, EnqueueOutcome, IngestQueue, WriterHandle};
use crate::layout::{HourBucket, PartitionLayout, Shape};
use crate::query::{QueryResult, QuerySurface};
use crate::stats::{ShapeCounters, StoreStats};
use crate::storage::{CompactionOutcome, Compactor, HotRow, HotStore};

/// The engine: producer API, live tailing, queries and shutdown.
///
/// Producer calls never block. Metrics and logs are offered to followers and
/// enqueued independently; neither outcome affects the other.
pub struct Store {
    config: StoreConfig,
    hot: Arc<HotStore>,
    compactor: Arc<Compactor>,
    surface: QuerySurface,
    runtime: IngestQueue<MetricEvent>,
    status: IngestQueue<StatusSnapshot>,
    snapshot: Mutex<SnapshotState>,
    followers: FollowRegistry,
    writers: Mutex<Vec<WriterHandle>>,
    closed: AtomicBool,
}

impl Store {
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let hot = Arc::new(HotStore::open(&config)?);
        let layout = PartitionLayout::new(&config.base_dir);
        let compactor = Arc::new(Compactor::new(Arc::clone(&hot), layout.clone()));
        let surface = QuerySurface::new(Arc::clone(&hot), layout);

        let mut writers = Vec::with_capacity(Shape::ALL.len());
        let (runtime, handle) = start_shape::<MetricEvent>(&config, &hot, &compactor)?;
        writers.push(handle);
        let (status, handle) = start_shape::<StatusSnapshot>(&config, &hot, &compactor)?;
        writers.push(handle);

        log::info!("store opened at {}", config.base_dir.display());
        Ok(Self {
            config,
            hot,
            compactor,
            surface,
            runtime,
            status,
            snapshot: Mutex::new(SnapshotState::new()),
            followers: FollowRegistry::new(),
            writers: Mutex::new(writers),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn hot(&self) -> &Arc<HotStore> {
        &self.hot
    }

    pub fn layout(&self) -> &PartitionLayout {
        self.compactor.layout()
    }

    /// Publish a metric sample to followers of `name` and enqueue it.
    pub fn send_metric(
        &self,
        name: &str,
        labels: Option<&Labels>,
        timestamp: Option<OffsetDateTime>,
        value: f64,
    ) -> EnqueueOutcome {
        let ts = normalize_timestamp(timestamp);
        self.followers
            .publish(name, &Sample::value(unix_millis(ts), value));
        self.enqueue_metric(MetricEvent::metric(name, labels, Some(ts), value))
    }

    /// Publish a log line under its stream name and enqueue it.
    pub fn send_log(
        &self,
        labels: &Labels,
        timestamp: Option<OffsetDateTime>,
        text: &str,
    ) -> EnqueueOutcome {
        let ts = normalize_timestamp(timestamp);
        self.followers
            .publish(labels.stream_name(), &Sample::text(unix_millis(ts), text));
        self.enqueue_metric(MetricEvent::log(labels, Some(ts), text))
    }

    pub fn enqueue_metric(&self, event: MetricEvent) -> EnqueueOutcome {
        self.runtime.offer(event)
    }

    pub fn enqueue_status(&self, snapshot: StatusSnapshot) -> EnqueueOutcome {
        self.status.offer(snapshot)
    }

    /// Merge `update` into the last known snapshot and enqueue a copy.
    pub fn update_status(
        &self,
        timestamp: Option<OffsetDateTime>,
        update: StatusUpdate,
    ) -> EnqueueOutcome {
        let mut state = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        let copy = state.apply(timestamp, update);
        // enqueue under the lock so queue order follows merge order
        self.enqueue_status(copy)
    }

    pub fn update_battery_12v(
        &self,
        timestamp: Option<OffsetDateTime>,
        soc: f64,
        volts: f64,
        amps: f64,
        temps_c: &[f64],
        status: &str,
    ) -> EnqueueOutcome {
        self.update_status(
            timestamp,
            StatusUpdate::Battery12V {
                soc,
                volts,
                amps,
                temps_c: temps_c.to_vec(),
                status: status.to_string(),
            },
        )
    }

    pub fn update_traction(
        &self,
        timestamp: Option<OffsetDateTime>,
        soc: f64,
        temp_c: Option<f64>,
    ) -> EnqueueOutcome {
        self.update_status(timestamp, StatusUpdate::Traction { soc, temp_c })
    }

    pub fn update_gps(&self, timestamp: Option<OffsetDateTime>, lat: f64, lon: f64) -> EnqueueOutcome {
        self.update_status(timestamp, StatusUpdate::Gps { lat, lon })
    }

    pub fn update_charger(
        &self,
        timestamp: Option<OffsetDateTime>,
        state: &str,
        soc: Option<f64>,
    ) -> EnqueueOutcome {
        self.update_status(
            timestamp,
            StatusUpdate::Charger {
                state: state.to_string(),
                soc,
            },
        )
    }

    pub fn update_hydra_channel(
        &self,
        timestamp: Option<OffsetDateTime>,
        channel: HydraChannel,
        volts: f64,
        amps: Option<f64>,
    ) -> EnqueueOutcome {
        self.update_status(
            timestamp,
            StatusUpdate::Hydra {
                channel,
                volts,
                amps,
            },
        )
    }

    /// Copy of the last known status snapshot.
    pub fn current_status(&self) -> StatusSnapshot {
        let state = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        state.current().clone()
    }

    pub fn follow(&self, name: &str, follower: &Follower) -> bool {
        self.followers.follow(name, follower)
    }

    pub fn unfollow(&self, name: &str, follower: &Follower) -> bool {
        self.followers.unfollow(name, follower)
    }

    pub fn publish(&self, name: &str, sample: &Sample) -> usize {
        self.followers.publish(name, sample)
    }

    pub fn followers(&self) -> &FollowRegistry {
        &self.followers
    }

    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        self.surface.query(sql)
    }

    /// Run [`Store::query`] on the blocking pool, giving up after `deadline`.
    /// A timed-out query keeps running to completion in the background.
    pub async fn query_with_timeout(&self, sql: &str, deadline: Duration) -> Result<QueryResult> {
        let surface = self.surface.clone();
        let sql = sql.to_string();
        let task = tokio::task::spawn_blocking(move || surface.query(&sql));
        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::Worker(format!("query task failed: {join}"))),
            Err(_) => Err(Error::QueryTimeout(deadline)),
        }
    }

    /// Compact one hour synchronously, e.g. to recover after a failed
    /// background compaction or for late rows.
    pub fn compact_hour(&self, shape: Shape, bucket: HourBucket) -> Result<CompactionOutcome> {
        let outcome = match shape {
            Shape::Runtime => self.compactor.compact_hour::<MetricEvent>(bucket),
            Shape::Status => self.compactor.compact_hour::<StatusSnapshot>(bucket),
        };
        let counters = self.counters(shape);
        match &outcome {
            Ok(CompactionOutcome::Compacted { .. }) => counters.record_compaction(),
            Ok(CompactionOutcome::Skipped) => {}
            Err(_) => counters.record_compaction_failure(),
        }
        outcome
    }

    /// Block until background compactions started so far have finished.
    pub fn wait_for_compactions(&self) -> Result<()> {
        self.compactor.wait_idle()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            runtime: self.runtime.counters().snapshot(),
            status: self.status.counters().snapshot(),
            followers: self.followers.follower_count(),
        }
    }

    fn counters(&self, shape: Shape) -> &Arc<ShapeCounters> {
        match shape {
            Shape::Runtime => self.runtime.counters(),
            Shape::Status => self.status.counters(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drain and stop both writers, then wait for in-flight compactions.
    /// Later calls are no-ops. Queries keep working afterwards.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let handles = {
            let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *writers)
        };
        let mut first_err = None;
        for mut handle in handles {
            if let Err(err) = handle.close() {
                log::error!("{} writer failed to stop cleanly: {err}", handle.shape());
                first_err.get_or_insert(err);
            }
        }
        if let Err(err) = self.compactor.wait_idle() {
            log::error!("compaction failed during close: {err}");
            first_err.get_or_insert(err);
        }
        log::info!("store closed");
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!("error closing store: {err}");
        }
    }
}

fn start_shape<R: HotRow>(
    config: &StoreConfig,
    hot: &Arc<HotStore>,
    compactor: &Arc<Compactor>,
) -> Result<(IngestQueue<R>, WriterHandle)> {
    let shape = config.shape(R::SHAPE);
    let counters = Arc::new(ShapeCounters::default());
    let (tx, rx) = mpsc::channel(shape.queue_capacity);
    let writer = BatchWriter::<R>::new(
        hot.connect()?,
        Arc::clone(compactor),
        Arc::clone(&counters),
        shape.batch_size,
    );
    let handle = spawn_batch_writer(writer, rx, shape.flush_interval())?;
    let queue = IngestQueue::new(R::SHAPE, tx, counters, config.drop_log_interval());
    Ok((queue, handle))
}
