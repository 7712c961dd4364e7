//! Read path over hot rows and compacted hours.
//!
//! Every request gets a fresh connection with one temp view per shape:
//! the hot table alone until a shape has compacted files, then the hot table
//! `UNION ALL` the hour partitions. Bare table names in the incoming SQL are
//! rewritten to those views.

pub mod guard;

use std::sync::{Arc, OnceLock};

use duckdb::types::{TimeUnit, Value};
use duckdb::Connection;
use regex::Regex;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::{Date, Duration as TimeDuration, OffsetDateTime};

use crate::error::Result;
use crate::layout::{PartitionLayout, Shape};
use crate::storage::HotStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Clone)]
pub struct QuerySurface {
    hot: Arc<HotStore>,
    layout: PartitionLayout,
}

impl QuerySurface {
    pub fn new(hot: Arc<HotStore>, layout: PartitionLayout) -> Self {
        Self { hot, layout }
    }

    /// Execute `sql` as given, after rewriting table names to the views.
    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        let conn = self.hot.connect()?;
        self.ensure_views(&conn)?;
        let sql = rewrite_for_history(sql);
        log::debug!("query: {sql}");

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let columns = rows
            .as_ref()
            .map(|s| s.column_names())
            .unwrap_or_default();

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(to_json(row.get::<_, Value>(idx)?));
            }
            out.push(values);
        }
        Ok(QueryResult { columns, rows: out })
    }

    fn ensure_views(&self, conn: &Connection) -> Result<()> {
        for shape in Shape::ALL {
            conn.execute_batch(&self.view_sql(shape))?;
        }
        Ok(())
    }

    fn view_sql(&self, shape: Shape) -> String {
        if !self.layout.has_files(shape) {
            return format!(
                "CREATE OR REPLACE TEMP VIEW {} AS SELECT * FROM {}",
                shape.view(),
                shape.table()
            );
        }
        format!(
            "CREATE OR REPLACE TEMP VIEW {} AS \
             SELECT * FROM {} \
             UNION ALL \
             SELECT * EXCLUDE (year, month, day, hour) \
             FROM read_parquet('{}', hive_partitioning = true)",
            shape.view(),
            shape.table(),
            self.layout.glob(shape).replace('\'', "''")
        )
    }
}

/// Rewrite whole-word table names to their view names.
pub fn rewrite_for_history(sql: &str) -> String {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        Shape::ALL
            .iter()
            .filter_map(|shape| {
                let pattern = format!(r"\b{}\b", regex::escape(shape.table()));
                Regex::new(&pattern).ok().map(|re| (re, shape.view()))
            })
            .collect()
    });

    let mut out = sql.to_string();
    for (re, view) in patterns {
        out = re.replace_all(&out, *view).into_owned();
    }
    out
}

fn to_json(value: Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(b),
        Value::TinyInt(v) => v.into(),
        Value::SmallInt(v) => v.into(),
        Value::Int(v) => v.into(),
        Value::BigInt(v) => v.into(),
        Value::HugeInt(v) => match i64::try_from(v) {
            Ok(v) => v.into(),
            Err(_) => Json::String(v.to_string()),
        },
        Value::UTinyInt(v) => v.into(),
        Value::USmallInt(v) => v.into(),
        Value::UInt(v) => v.into(),
        Value::UBigInt(v) => v.into(),
        Value::Float(v) => float(v as f64),
        Value::Double(v) => float(v),
        Value::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(float)
            .unwrap_or(Json::Null),
        Value::Timestamp(unit, v) => timestamp(unit, v),
        Value::Date32(days) => {
            let epoch = Date::from_calendar_date(1970, time::Month::January, 1);
            match epoch.ok().and_then(|e| e.checked_add(TimeDuration::days(days as i64))) {
                Some(date) => Json::String(date.to_string()),
                None => Json::Null,
            }
        }
        Value::Text(s) | Value::Enum(s) => Json::String(s),
        Value::Blob(bytes) => Json::String(String::from_utf8_lossy(&bytes).into_owned()),
        Value::List(items) => Json::Array(items.into_iter().map(to_json).collect()),
        other => Json::String(format!("{other:?}")),
    }
}

fn float(v: f64) -> serde_json::Value {
    serde_json::Number::from_f64(v)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn timestamp(unit: TimeUnit, v: i64) -> serde_json::Value {
    let nanos = match unit {
        TimeUnit::Second => v as i128 * 1_000_000_000,
        TimeUnit::Millisecond => v as i128 * 1_000_000,
        TimeUnit::Microsecond => v as i128 * 1_000,
        TimeUnit::Nanosecond => v as i128,
    };
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|ts| ts.format(&Rfc3339).ok())
        .map(serde_json::Value::String)
        .unwrap_or(serde_json::Value::Null)
}
