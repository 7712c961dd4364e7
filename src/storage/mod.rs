//! Hot store, row mapping and hourly compaction.

mod compactor;
mod hot;
mod rows;
mod sink;

pub use compactor::{CompactionOutcome, Compactor};
pub use hot::HotStore;
pub use rows::HotRow;
pub use sink::ParquetSink;
