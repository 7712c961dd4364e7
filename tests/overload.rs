use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::json;
use tempfile::tempdir;
use time::macros::datetime;

use tailstore::{EnqueueOutcome, Store, StoreConfig};

const EVENTS: usize = 20_000;

#[test]
fn full_queue_drops_and_counts_without_blocking() -> Result<()> {
    let temp = tempdir()?;
    let mut config = StoreConfig::in_memory(temp.path());
    config.runtime.queue_capacity = 4;
    config.runtime.batch_size = 64;
    let store = Store::open(config)?;

    let ts = datetime!(2024-01-01 00:00 UTC);
    let mut accepted = 0u64;
    let mut dropped = 0u64;
    let mut slowest = Duration::ZERO;
    for i in 0..EVENTS {
        let started = Instant::now();
        let outcome = store.send_metric("soc", None, Some(ts), i as f64);
        slowest = slowest.max(started.elapsed());
        match outcome {
            EnqueueOutcome::Accepted => accepted += 1,
            EnqueueOutcome::Dropped => dropped += 1,
            EnqueueOutcome::Closed => panic!("store closed early"),
        }
    }
    store.close()?;

    assert_eq!(accepted + dropped, EVENTS as u64);
    assert!(slowest < Duration::from_secs(1), "enqueue stalled for {slowest:?}");

    let stats = store.stats();
    assert_eq!(stats.runtime.enqueued, accepted);
    assert_eq!(stats.runtime.dropped, dropped);

    // exactly the accepted records reach storage
    let count = store.query("select count(*) from runtime_metrics")?;
    assert_eq!(count.rows, vec![vec![json!(accepted)]]);
    Ok(())
}

#[test]
fn shapes_have_independent_queues() -> Result<()> {
    let temp = tempdir()?;
    let mut config = StoreConfig::in_memory(temp.path());
    config.status.queue_capacity = 1;
    config.status.flush_interval_ms = 60_000;
    let store = Store::open(config)?;

    for _ in 0..1_000 {
        store.update_gps(None, 1.0, 2.0);
    }
    assert!(store.send_metric("soc", None, None, 1.0).is_accepted());
    store.close()?;

    let stats = store.stats();
    assert_eq!(stats.status.enqueued + stats.status.dropped, 1_000);
    assert_eq!(stats.runtime.dropped, 0);
    Ok(())
}
