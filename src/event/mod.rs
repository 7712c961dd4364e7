//! Records flowing through the engine.
//!
//! Two shapes: point records ([`MetricEvent`], metric samples and log lines)
//! and wide records ([`StatusSnapshot`], one row per subsystem update).

mod metric;
mod status;

pub use metric::{EventKind, Labels, MetricEvent};
pub use status::{HydraChannel, SnapshotState, StatusSnapshot, StatusUpdate};

use time::{OffsetDateTime, UtcOffset};

/// UTC timestamp, or now when the producer left it unset.
pub fn normalize_timestamp(ts: Option<OffsetDateTime>) -> OffsetDateTime {
    match ts {
        Some(ts) => ts.to_offset(UtcOffset::UTC),
        None => OffsetDateTime::now_utc(),
    }
}

/// Microseconds since the Unix epoch; the hot store's timestamp resolution.
pub fn unix_micros(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000) as i64
}

/// Milliseconds since the Unix epoch; the live-tail timestamp resolution.
pub fn unix_millis(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000_000) as i64
}
