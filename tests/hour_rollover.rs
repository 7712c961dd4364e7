use std::fs::File;
use std::path::Path;
use std::time::{Duration as StdDuration, Instant};

use anyhow::Result;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::json;
use tempfile::tempdir;
use time::macros::datetime;
use time::Duration;

use tailstore::{CompactionOutcome, HourBucket, Shape, Store, StoreConfig};

fn parquet_rows(path: &Path) -> Result<usize> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
    let mut rows = 0;
    for batch in reader {
        rows += batch?.num_rows();
    }
    Ok(rows)
}

fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + StdDuration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(StdDuration::from_millis(10));
    }
}

fn fast_config(base: &Path) -> StoreConfig {
    let mut config = StoreConfig::new(base);
    config.runtime.flush_interval_ms = 10;
    config.status.flush_interval_ms = 10;
    config
}

#[test]
fn rollover_splits_rows_between_file_and_hot_store() -> Result<()> {
    let temp = tempdir()?;
    let store = Store::open(fast_config(temp.path()))?;

    let start = datetime!(2024-01-01 00:59:00 UTC);
    for i in 0..250 {
        let ts = start + Duration::milliseconds(600 * i);
        assert!(store.send_metric("soc", None, Some(ts), 77.0).is_accepted());
    }
    store.close()?;

    let result = store.query("SELECT count(*) FROM runtime_metrics_view WHERE name='soc'")?;
    assert_eq!(result.rows, vec![vec![json!(250)]]);

    let hour0 = HourBucket::parse("2024-01-01T00")?;
    let file = store.layout().file_path(Shape::Runtime, hour0)?;
    assert_eq!(parquet_rows(&file)?, 100);
    assert_eq!(store.hot().count_hour(Shape::Runtime, hour0)?, 0);
    assert_eq!(store.hot().count_hour(Shape::Runtime, hour0.next())?, 150);

    // bare table name reaches the same view
    let rewritten = store.query("select count(*) from runtime_metrics where value = 77.0")?;
    assert_eq!(rewritten.rows, vec![vec![json!(250)]]);

    let stats = store.stats();
    assert_eq!(stats.runtime.enqueued, 250);
    assert_eq!(stats.runtime.rows_written, 250);
    assert_eq!(stats.runtime.compactions, 1);
    Ok(())
}

#[test]
fn each_row_lands_in_its_own_hour() -> Result<()> {
    let temp = tempdir()?;
    let store = Store::open(fast_config(temp.path()))?;

    let hours = [
        (datetime!(2024-03-10 22:15 UTC), 3),
        (datetime!(2024-03-10 23:45 UTC), 5),
        (datetime!(2024-03-11 00:05 UTC), 2),
        (datetime!(2024-03-11 01:30 UTC), 4),
    ];
    for (base, n) in hours {
        for i in 0..n {
            store.send_metric("amps", None, Some(base + Duration::seconds(i)), i as f64);
        }
    }
    store.close()?;

    let files = store.layout().list_files(Shape::Runtime)?;
    let compacted: Vec<String> = files.iter().map(|(b, _)| b.to_string()).collect();
    assert_eq!(
        compacted,
        vec!["2024-03-10T22", "2024-03-10T23", "2024-03-11T00"]
    );
    assert_eq!(parquet_rows(&files[1].1)?, 5);
    assert_eq!(store.hot().count(Shape::Runtime)?, 4);

    let per_hour = store.query(
        "select date_part('hour', ts) as h, count(*) as n from runtime_metrics group by h order by min(ts)",
    )?;
    assert_eq!(
        per_hour.rows,
        vec![
            vec![json!(22), json!(3)],
            vec![json!(23), json!(5)],
            vec![json!(0), json!(2)],
            vec![json!(1), json!(4)],
        ]
    );
    Ok(())
}

#[test]
fn recompaction_does_not_duplicate_rows() -> Result<()> {
    let temp = tempdir()?;
    let store = Store::open(fast_config(temp.path()))?;

    let hour0 = HourBucket::parse("2024-01-01T00")?;
    store.send_metric("soc", None, Some(datetime!(2024-01-01 00:10 UTC)), 1.0);
    store.send_metric("soc", None, Some(datetime!(2024-01-01 01:10 UTC)), 2.0);
    wait_until(|| store.stats().runtime.compactions == 1);

    // late row for an hour that is already closed
    store.send_metric("soc", None, Some(datetime!(2024-01-01 00:20 UTC)), 3.0);
    store.close()?;
    assert_eq!(store.hot().count_hour(Shape::Runtime, hour0)?, 1);

    let outcome = store.compact_hour(Shape::Runtime, hour0)?;
    let CompactionOutcome::Compacted { rows, deleted, .. } = outcome else {
        panic!("late row should have been compacted");
    };
    assert_eq!((rows, deleted), (2, 1));
    assert_eq!(store.compact_hour(Shape::Runtime, hour0)?, CompactionOutcome::Skipped);

    let result = store.query("select value from runtime_metrics order by value")?;
    assert_eq!(
        result.rows,
        vec![vec![json!(1.0)], vec![json!(2.0)], vec![json!(3.0)]]
    );
    let file = store.layout().file_path(Shape::Runtime, hour0)?;
    assert_eq!(parquet_rows(&file)?, 2);
    Ok(())
}

#[test]
fn status_rows_compact_into_status_tree() -> Result<()> {
    let temp = tempdir()?;
    let store = Store::open(fast_config(temp.path()))?;

    store.update_battery_12v(
        Some(datetime!(2024-01-01 00:30 UTC)),
        91.0,
        13.1,
        -2.0,
        &[3.5, 2.0],
        "ok",
    );
    store.update_gps(Some(datetime!(2024-01-01 01:00 UTC)), 45.5, -122.6);
    store.close()?;

    let files = store.layout().list_files(Shape::Status)?;
    assert_eq!(files.len(), 1);
    assert!(files[0].1.ends_with("hour=00/status.parquet"));

    let result = store.query(
        "select battery12v_temp_c, battery12v_temps, gps_lat from status_hourly order by ts",
    )?;
    assert_eq!(
        result.rows,
        vec![
            vec![json!(2.0), json!("3.5,2.0"), json!(null)],
            vec![json!(2.0), json!("3.5,2.0"), json!(45.5)],
        ]
    );
    Ok(())
}

#[test]
fn hot_rows_survive_reopen() -> Result<()> {
    let temp = tempdir()?;
    {
        let store = Store::open(fast_config(temp.path()))?;
        store.send_metric("soc", None, Some(datetime!(2024-01-01 05:00 UTC)), 1.0);
        store.close()?;
    }
    let store = Store::open(fast_config(temp.path()))?;
    let result = store.query("select count(*) from runtime_metrics")?;
    assert_eq!(result.rows, vec![vec![json!(1)]]);
    Ok(())
}
