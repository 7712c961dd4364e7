//! Embedded telemetry store: non-blocking ingestion into an embedded hot
//! store, hourly compaction into hive-partitioned parquet, a query surface
//! over both, and live tailing of named streams.

pub mod config;
pub mod error;
pub mod event;
pub mod follow;
pub mod ingest;
pub mod layout;
pub mod query;
pub mod stats;
pub mod storage;
pub mod store;

pub use config::{ShapeConfig, StoreConfig};
pub use error::{Error, Result};
pub use event::{EventKind, HydraChannel, Labels, MetricEvent, StatusSnapshot, StatusUpdate};
pub use follow::{FollowRegistry, Follower, FollowerStream, Reading, Sample};
pub use ingest::EnqueueOutcome;
pub use layout::{HourBucket, PartitionLayout, Shape};
pub use query::{QueryResult, QuerySurface};
pub use stats::{ShapeStats, StoreStats};
pub use storage::CompactionOutcome;
pub use store::Store;
