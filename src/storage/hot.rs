use std::sync::{Mutex, PoisonError};

use duckdb::types::{TimeUnit, Value};
use duckdb::{params, Connection};

use crate::config::StoreConfig;
use crate::error::Result;
use crate::layout::{HourBucket, Shape};
use crate::storage::rows::{RUNTIME_DDL, STATUS_DDL};

/// The embedded database holding not-yet-compacted rows.
///
/// Writers, compaction tasks and queries each take their own connection from
/// [`HotStore::connect`] and rely on the engine's MVCC for isolation.
pub struct HotStore {
    root: Mutex<Connection>,
}

impl HotStore {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.base_dir)?;
        let conn = if config.is_in_memory() {
            Connection::open_in_memory()?
        } else {
            let path = config.resolved_db_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(&path)?
        };
        conn.execute_batch(RUNTIME_DDL)?;
        conn.execute_batch(STATUS_DDL)?;
        log::info!(
            "hot store ready at {}",
            if config.is_in_memory() {
                "memory".to_string()
            } else {
                config.resolved_db_path().display().to_string()
            }
        );
        Ok(Self {
            root: Mutex::new(conn),
        })
    }

    /// New connection to the same database instance.
    pub fn connect(&self) -> Result<Connection> {
        let root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(root.try_clone()?)
    }

    /// Rows currently held for `bucket`.
    pub fn count_hour(&self, shape: Shape, bucket: HourBucket) -> Result<u64> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT count(*) FROM {} WHERE ts >= ? AND ts < ?",
            shape.table()
        );
        let count: i64 = conn.query_row(&sql, params![hour_start(bucket), hour_end(bucket)], |row| {
            row.get(0)
        })?;
        Ok(count.max(0) as u64)
    }

    pub fn count(&self, shape: Shape) -> Result<u64> {
        let conn = self.connect()?;
        let sql = format!("SELECT count(*) FROM {}", shape.table());
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

pub(crate) fn micros_param(micros: i64) -> Value {
    Value::Timestamp(TimeUnit::Microsecond, micros)
}

pub(crate) fn hour_start(bucket: HourBucket) -> Value {
    micros_param(bucket.start_micros())
}

pub(crate) fn hour_end(bucket: HourBucket) -> Value {
    micros_param(bucket.end_micros())
}

/// Delete `bucket`'s rows of `shape` through `conn`, returning the count.
pub(crate) fn delete_hour(conn: &Connection, shape: Shape, bucket: HourBucket) -> Result<usize> {
    let sql = format!("DELETE FROM {} WHERE ts >= ? AND ts < ?", shape.table());
    Ok(conn.execute(&sql, params![hour_start(bucket), hour_end(bucket)])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_tables_on_open() {
        let temp = tempdir().unwrap();
        let hot = HotStore::open(&StoreConfig::new(temp.path())).unwrap();
        assert!(temp.path().join("tailstore.duckdb").exists());
        assert_eq!(hot.count(Shape::Runtime).unwrap(), 0);
        assert_eq!(hot.count(Shape::Status).unwrap(), 0);
    }

    #[test]
    fn cloned_connections_share_state() {
        let temp = tempdir().unwrap();
        let hot = HotStore::open(&StoreConfig::in_memory(temp.path())).unwrap();
        let writer = hot.connect().unwrap();
        writer
            .execute(
                "INSERT INTO runtime_metrics (ts, name, value, kind) VALUES (?, 'soc', 1.0, 'metric')",
                params![micros_param(1_704_067_200_000_000)],
            )
            .unwrap();
        let bucket = HourBucket::from_unix_secs(1_704_067_200);
        assert_eq!(hot.count_hour(Shape::Runtime, bucket).unwrap(), 1);
        assert_eq!(hot.count_hour(Shape::Runtime, bucket.next()).unwrap(), 0);

        let deleted = delete_hour(&hot.connect().unwrap(), Shape::Runtime, bucket).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(hot.count(Shape::Runtime).unwrap(), 0);
    }
}
