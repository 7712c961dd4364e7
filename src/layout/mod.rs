//! On-disk layout.
//!
//! ```text
//! <base_dir>/tailstore.duckdb
//! <base_dir>/runtime/year=YYYY/month=MM/day=DD/hour=HH/runtime.parquet
//! <base_dir>/status/year=YYYY/month=MM/day=DD/hour=HH/status.parquet
//! ```

mod hour;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use hour::HourBucket;

pub const DEFAULT_DB_FILE: &str = "tailstore.duckdb";
const PARQUET_EXT: &str = "parquet";

/// Record shape: each has its own queue, writer, hot table and partition tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Runtime,
    Status,
}

impl Shape {
    pub const ALL: [Shape; 2] = [Shape::Runtime, Shape::Status];

    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::Runtime => "runtime",
            Shape::Status => "status",
        }
    }

    /// Hot-store table name.
    pub fn table(&self) -> &'static str {
        match self {
            Shape::Runtime => "runtime_metrics",
            Shape::Status => "status_hourly",
        }
    }

    /// Name of the hot ∪ compacted view that queries are rewritten to.
    pub fn view(&self) -> &'static str {
        match self {
            Shape::Runtime => "runtime_metrics_view",
            Shape::Status => "status_hourly_view",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{PARQUET_EXT}", self.as_str())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Shape {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "runtime" | "runtime_metrics" => Ok(Shape::Runtime),
            "status" | "status_hourly" => Ok(Shape::Status),
            other => Err(Error::Config(format!("unknown shape: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PartitionLayout {
    root: PathBuf,
}

impl PartitionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shape_dir(&self, shape: Shape) -> PathBuf {
        self.root.join(shape.as_str())
    }

    pub fn hour_dir(&self, shape: Shape, bucket: HourBucket) -> Result<PathBuf> {
        let mut dir = self.shape_dir(shape);
        for component in bucket.hive_components()? {
            dir.push(component);
        }
        Ok(dir)
    }

    pub fn file_path(&self, shape: Shape, bucket: HourBucket) -> Result<PathBuf> {
        Ok(self.hour_dir(shape, bucket)?.join(shape.file_name()))
    }

    /// Glob matching every compacted file of `shape`, with forward slashes.
    pub fn glob(&self, shape: Shape) -> String {
        let path = self
            .shape_dir(shape)
            .join("year=*")
            .join("month=*")
            .join("day=*")
            .join("hour=*")
            .join(shape.file_name());
        path.to_string_lossy().replace('\\', "/")
    }

    /// True once at least one compacted file exists for `shape`.
    pub fn has_files(&self, shape: Shape) -> bool {
        let target = shape.file_name();
        let mut stack = vec![self.shape_dir(shape)];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if entry.file_name().to_string_lossy() == target {
                    return true;
                }
            }
        }
        false
    }

    /// Every compacted file of `shape`, ordered by hour.
    pub fn list_files(&self, shape: Shape) -> Result<Vec<(HourBucket, PathBuf)>> {
        let base = self.shape_dir(shape);
        let target = shape.file_name();
        let mut found = Vec::new();
        if !base.exists() {
            return Ok(found);
        }
        let mut stack = vec![base.clone()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    stack.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy() != target {
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&base) else {
                    continue;
                };
                let segments = rel
                    .components()
                    .filter_map(|c| c.as_os_str().to_str())
                    .collect::<Vec<_>>();
                if let Some(bucket) = HourBucket::from_hive_segments(segments) {
                    found.push((bucket, path));
                }
            }
        }
        found.sort_by_key(|(bucket, _)| *bucket);
        Ok(found)
    }
}
