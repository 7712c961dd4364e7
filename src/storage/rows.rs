//! Per-shape table definitions and row mapping.
//!
//! Column order is shared by the hot table, the parquet schema and the
//! insert/select statements; the union view depends on it.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use duckdb::{params, Connection, Row};
use time::OffsetDateTime;

use crate::error::Result;
use crate::event::{normalize_timestamp, unix_micros, EventKind, MetricEvent, StatusSnapshot};
use crate::layout::{HourBucket, Shape};
use crate::storage::hot::{hour_end, hour_start, micros_param};

pub(crate) const RUNTIME_DDL: &str = "CREATE TABLE IF NOT EXISTS runtime_metrics (
    ts TIMESTAMP,
    name VARCHAR,
    value DOUBLE,
    text VARCHAR,
    labels VARCHAR,
    kind VARCHAR
);";

pub(crate) const STATUS_DDL: &str = "CREATE TABLE IF NOT EXISTS status_hourly (
    ts TIMESTAMP,
    battery12v_soc DOUBLE,
    battery12v_volts DOUBLE,
    battery12v_amps DOUBLE,
    battery12v_temp_c DOUBLE,
    battery12v_temps VARCHAR,
    battery12v_status VARCHAR,
    traction_soc DOUBLE,
    traction_temp_c DOUBLE,
    gps_lat DOUBLE,
    gps_lon DOUBLE,
    charger_state VARCHAR,
    charger_soc DOUBLE,
    hydra_v1_volts DOUBLE,
    hydra_v1_amps DOUBLE,
    hydra_v2_volts DOUBLE,
    hydra_v2_amps DOUBLE,
    hydra_v3_volts DOUBLE,
    hydra_v3_amps DOUBLE,
    hydra_vin_volts DOUBLE
);";

const RUNTIME_COLUMNS: &str = "ts, name, value, text, labels, kind";

const STATUS_COLUMNS: &str = "ts, battery12v_soc, battery12v_volts, battery12v_amps, \
    battery12v_temp_c, battery12v_temps, battery12v_status, traction_soc, traction_temp_c, \
    gps_lat, gps_lon, charger_state, charger_soc, hydra_v1_volts, hydra_v1_amps, \
    hydra_v2_volts, hydra_v2_amps, hydra_v3_volts, hydra_v3_amps, hydra_vin_volts";

/// A record that lives in one hot table and compacts into one parquet file per hour.
pub trait HotRow: Send + Sized + 'static {
    const SHAPE: Shape;
    /// Column list in table order, `ts` first.
    const COLUMNS: &'static str;

    fn timestamp(&self) -> Option<OffsetDateTime>;

    fn set_timestamp(&mut self, ts: OffsetDateTime);

    /// Insert `rows` in a single transaction; nothing is committed on error.
    fn insert_batch(conn: &mut Connection, rows: &[Self]) -> Result<()>;

    /// Map one row of [`HotRow::hour_sql`] back into a record.
    fn from_row(row: &Row<'_>) -> duckdb::Result<Self>;

    /// Select for `start <= ts < end`, ordered by `ts`; binds the bucket bounds.
    fn hour_sql() -> String {
        select_sql(Self::SHAPE, Self::COLUMNS)
    }

    /// All rows of `bucket`, ordered by `ts`.
    fn select_hour(conn: &Connection, bucket: HourBucket) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&Self::hour_sql())?;
        let rows = stmt.query_map(params![hour_start(bucket), hour_end(bucket)], Self::from_row)?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    fn arrow_schema() -> SchemaRef;

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch>;
}

fn ts_field() -> Field {
    Field::new("ts", DataType::Timestamp(TimeUnit::Microsecond, None), true)
}

fn ts_micros(ts: Option<OffsetDateTime>) -> i64 {
    unix_micros(normalize_timestamp(ts))
}

fn from_micros(micros: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(micros as i128 * 1_000).ok()
}

fn select_sql(shape: Shape, columns: &str) -> String {
    // epoch_us keeps the timestamp as a plain BIGINT on the way out
    let rest = columns.trim_start_matches("ts, ");
    format!(
        "SELECT epoch_us(ts), {rest} FROM {} WHERE ts >= ? AND ts < ? ORDER BY ts",
        shape.table()
    )
}

fn insert_sql(shape: Shape, columns: &str, arity: usize) -> String {
    let placeholders = vec!["?"; arity].join(", ");
    format!(
        "INSERT INTO {} ({columns}) VALUES ({placeholders})",
        shape.table()
    )
}

fn f64_column(rows: &[StatusSnapshot], get: impl Fn(&StatusSnapshot) -> Option<f64>) -> ArrayRef {
    Arc::new(rows.iter().map(get).collect::<Float64Array>())
}

fn str_column<'a>(
    rows: &'a [StatusSnapshot],
    get: impl Fn(&'a StatusSnapshot) -> Option<&'a str>,
) -> ArrayRef {
    Arc::new(rows.iter().map(get).collect::<StringArray>())
}

impl HotRow for MetricEvent {
    const SHAPE: Shape = Shape::Runtime;
    const COLUMNS: &'static str = RUNTIME_COLUMNS;

    fn timestamp(&self) -> Option<OffsetDateTime> {
        self.timestamp
    }

    fn set_timestamp(&mut self, ts: OffsetDateTime) {
        self.timestamp = Some(ts);
    }

    fn insert_batch(conn: &mut Connection, rows: &[Self]) -> Result<()> {
        let sql = insert_sql(Self::SHAPE, Self::COLUMNS, 6);
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                stmt.execute(params![
                    micros_param(ts_micros(row.timestamp)),
                    row.name,
                    row.value,
                    row.text,
                    row.labels,
                    row.kind.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        let kind: Option<String> = row.get(5)?;
        Ok(MetricEvent {
            timestamp: from_micros(row.get(0)?),
            name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            value: row.get(2)?,
            text: row.get(3)?,
            labels: row.get(4)?,
            kind: kind
                .and_then(|k| k.parse().ok())
                .unwrap_or(EventKind::Metric),
        })
    }

    fn arrow_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            ts_field(),
            Field::new("name", DataType::Utf8, true),
            Field::new("value", DataType::Float64, true),
            Field::new("text", DataType::Utf8, true),
            Field::new("labels", DataType::Utf8, true),
            Field::new("kind", DataType::Utf8, true),
        ]))
    }

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(TimestampMicrosecondArray::from(
                rows.iter().map(|r| ts_micros(r.timestamp)).collect::<Vec<_>>(),
            )),
            Arc::new(rows.iter().map(|r| Some(r.name.as_str())).collect::<StringArray>()),
            Arc::new(rows.iter().map(|r| r.value).collect::<Float64Array>()),
            Arc::new(rows.iter().map(|r| r.text.as_deref()).collect::<StringArray>()),
            Arc::new(rows.iter().map(|r| r.labels.as_deref()).collect::<StringArray>()),
            Arc::new(rows.iter().map(|r| Some(r.kind.as_str())).collect::<StringArray>()),
        ];
        Ok(RecordBatch::try_new(Self::arrow_schema(), columns)?)
    }
}

impl HotRow for StatusSnapshot {
    const SHAPE: Shape = Shape::Status;
    const COLUMNS: &'static str = STATUS_COLUMNS;

    fn timestamp(&self) -> Option<OffsetDateTime> {
        self.timestamp
    }

    fn set_timestamp(&mut self, ts: OffsetDateTime) {
        self.timestamp = Some(ts);
    }

    fn insert_batch(conn: &mut Connection, rows: &[Self]) -> Result<()> {
        let sql = insert_sql(Self::SHAPE, Self::COLUMNS, 20);
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                stmt.execute(params![
                    micros_param(ts_micros(row.timestamp)),
                    row.battery12v_soc,
                    row.battery12v_volts,
                    row.battery12v_amps,
                    row.battery12v_temp_c,
                    row.battery12v_temps,
                    row.battery12v_status,
                    row.traction_soc,
                    row.traction_temp_c,
                    row.gps_lat,
                    row.gps_lon,
                    row.charger_state,
                    row.charger_soc,
                    row.hydra_v1_volts,
                    row.hydra_v1_amps,
                    row.hydra_v2_volts,
                    row.hydra_v2_amps,
                    row.hydra_v3_volts,
                    row.hydra_v3_amps,
                    row.hydra_vin_volts,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(StatusSnapshot {
            timestamp: from_micros(row.get(0)?),
            battery12v_soc: row.get(1)?,
            battery12v_volts: row.get(2)?,
            battery12v_amps: row.get(3)?,
            battery12v_temp_c: row.get(4)?,
            battery12v_temps: row.get(5)?,
            battery12v_status: row.get(6)?,
            traction_soc: row.get(7)?,
            traction_temp_c: row.get(8)?,
            gps_lat: row.get(9)?,
            gps_lon: row.get(10)?,
            charger_state: row.get(11)?,
            charger_soc: row.get(12)?,
            hydra_v1_volts: row.get(13)?,
            hydra_v1_amps: row.get(14)?,
            hydra_v2_volts: row.get(15)?,
            hydra_v2_amps: row.get(16)?,
            hydra_v3_volts: row.get(17)?,
            hydra_v3_amps: row.get(18)?,
            hydra_vin_volts: row.get(19)?,
        })
    }

    fn arrow_schema() -> SchemaRef {
        let f64_field = |name: &str| Field::new(name, DataType::Float64, true);
        let str_field = |name: &str| Field::new(name, DataType::Utf8, true);
        Arc::new(Schema::new(vec![
            ts_field(),
            f64_field("battery12v_soc"),
            f64_field("battery12v_volts"),
            f64_field("battery12v_amps"),
            f64_field("battery12v_temp_c"),
            str_field("battery12v_temps"),
            str_field("battery12v_status"),
            f64_field("traction_soc"),
            f64_field("traction_temp_c"),
            f64_field("gps_lat"),
            f64_field("gps_lon"),
            str_field("charger_state"),
            f64_field("charger_soc"),
            f64_field("hydra_v1_volts"),
            f64_field("hydra_v1_amps"),
            f64_field("hydra_v2_volts"),
            f64_field("hydra_v2_amps"),
            f64_field("hydra_v3_volts"),
            f64_field("hydra_v3_amps"),
            f64_field("hydra_vin_volts"),
        ]))
    }

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(TimestampMicrosecondArray::from(
                rows.iter().map(|r| ts_micros(r.timestamp)).collect::<Vec<_>>(),
            )),
            f64_column(rows, |r| r.battery12v_soc),
            f64_column(rows, |r| r.battery12v_volts),
            f64_column(rows, |r| r.battery12v_amps),
            f64_column(rows, |r| r.battery12v_temp_c),
            str_column(rows, |r| r.battery12v_temps.as_deref()),
            str_column(rows, |r| r.battery12v_status.as_deref()),
            f64_column(rows, |r| r.traction_soc),
            f64_column(rows, |r| r.traction_temp_c),
            f64_column(rows, |r| r.gps_lat),
            f64_column(rows, |r| r.gps_lon),
            str_column(rows, |r| r.charger_state.as_deref()),
            f64_column(rows, |r| r.charger_soc),
            f64_column(rows, |r| r.hydra_v1_volts),
            f64_column(rows, |r| r.hydra_v1_amps),
            f64_column(rows, |r| r.hydra_v2_volts),
            f64_column(rows, |r| r.hydra_v2_amps),
            f64_column(rows, |r| r.hydra_v3_volts),
            f64_column(rows, |r| r.hydra_v3_amps),
            f64_column(rows, |r| r.hydra_vin_volts),
        ];
        Ok(RecordBatch::try_new(Self::arrow_schema(), columns)?)
    }
}
