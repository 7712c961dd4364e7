//! Store configuration.
//!
//! Point metrics get a queue and batch an order of magnitude larger than
//! status rows, and a much tighter flush tick.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layout::{Shape, DEFAULT_DB_FILE};

/// `db_path` value that keeps the hot store in memory.
pub const IN_MEMORY: &str = ":memory:";

/// Per-shape queue and batch sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeConfig {
    /// Bounded ingestion queue depth. Records beyond it are dropped.
    pub queue_capacity: usize,

    /// Rows that force an eager flush before the tick.
    pub batch_size: usize,

    /// Periodic flush tick in milliseconds.
    pub flush_interval_ms: u64,
}

impl ShapeConfig {
    pub fn runtime_default() -> Self {
        Self {
            queue_capacity: 200_000,
            batch_size: 20_000,
            flush_interval_ms: 100,
        }
    }

    pub fn status_default() -> Self {
        Self {
            queue_capacity: 20_000,
            batch_size: 200,
            flush_interval_ms: 2_000,
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    fn validate(&self, shape: Shape) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Config(format!("{shape}: queue_capacity must be > 0")));
        }
        if self.batch_size == 0 {
            return Err(Error::Config(format!("{shape}: batch_size must be > 0")));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::Config(format!("{shape}: flush_interval_ms must be > 0")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root for the hot-store file and the partition trees.
    pub base_dir: PathBuf,

    /// Hot-store database file. Default: `<base_dir>/tailstore.duckdb`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    #[serde(default = "ShapeConfig::runtime_default")]
    pub runtime: ShapeConfig,

    #[serde(default = "ShapeConfig::status_default")]
    pub status: ShapeConfig,

    /// Minimum spacing between "queue full" warnings per shape.
    #[serde(default = "default_drop_log_interval_secs")]
    pub drop_log_interval_secs: u64,
}

fn default_drop_log_interval_secs() -> u64 {
    10
}

impl StoreConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            db_path: None,
            runtime: ShapeConfig::runtime_default(),
            status: ShapeConfig::status_default(),
            drop_log_interval_secs: default_drop_log_interval_secs(),
        }
    }

    /// Same as [`StoreConfig::new`] with the hot store kept in memory.
    pub fn in_memory(base_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::new(base_dir);
        config.db_path = Some(PathBuf::from(IN_MEMORY));
        config
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn shape(&self, shape: Shape) -> &ShapeConfig {
        match shape {
            Shape::Runtime => &self.runtime,
            Shape::Status => &self.status,
        }
    }

    pub fn shape_mut(&mut self, shape: Shape) -> &mut ShapeConfig {
        match shape {
            Shape::Runtime => &mut self.runtime,
            Shape::Status => &mut self.status,
        }
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.base_dir.join(DEFAULT_DB_FILE))
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path.as_deref() == Some(Path::new(IN_MEMORY))
    }

    pub fn drop_log_interval(&self) -> Duration {
        Duration::from_secs(self.drop_log_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(Error::Config("base_dir is required".to_string()));
        }
        for shape in Shape::ALL {
            self.shape(shape).validate(shape)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_shape_sizing() {
        let config = StoreConfig::new("/data");
        assert_eq!(config.runtime.batch_size, 20_000);
        assert_eq!(config.status.flush_interval(), Duration::from_secs(2));
        assert_eq!(config.resolved_db_path(), PathBuf::from("/data/tailstore.duckdb"));
        assert!(!config.is_in_memory());
        assert!(StoreConfig::in_memory("/data").is_in_memory());
        config.validate().unwrap();
    }

    #[test]
    fn json_fills_missing_fields() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store.json");
        std::fs::write(
            &path,
            r#"{"base_dir": "/var/leaf", "status": {"queue_capacity": 10, "batch_size": 5, "flush_interval_ms": 50}}"#,
        )
        .unwrap();
        let config = StoreConfig::from_json_file(&path).unwrap();
        assert_eq!(config.status.batch_size, 5);
        assert_eq!(config.runtime, ShapeConfig::runtime_default());
        assert_eq!(config.drop_log_interval_secs, 10);
    }

    #[test]
    fn rejects_zero_sizes() {
        let mut config = StoreConfig::new("/data");
        config.runtime.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = StoreConfig::new("");
        config.status.batch_size = 1;
        assert!(config.validate().is_err());
    }
}
