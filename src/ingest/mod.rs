//! Bounded queues and the per-shape batch writers behind them.

mod queue;
mod writer;

pub use queue::{DropCounter, EnqueueOutcome, IngestQueue};
pub use writer::{run_batch_writer, spawn_batch_writer, BatchWriter, WriterHandle};
