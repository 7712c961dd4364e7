//! SQL policy for untrusted query callers (CLI, HTTP front ends).
//!
//! [`QuerySurface`](super::QuerySurface) executes whatever it is handed;
//! callers that accept SQL from outside run it through here first.

use serde::Serialize;

use crate::error::{Error, Result};

/// Body returned to a caller whose query was rejected or failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sql: String,
}

impl QueryErrorBody {
    pub fn new(error: impl Into<String>, sql: &str) -> Self {
        Self {
            error: error.into(),
            sql: sql.trim().to_string(),
        }
    }
}

/// Accept a single read-only statement: `SELECT ...` or `WITH ...`, no `;`.
/// Returns the trimmed SQL.
pub fn validate_sql(sql: &str) -> Result<&str> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(Error::QueryRejected("sql is required".to_string()));
    }
    let lowered = sql.to_ascii_lowercase();
    if lowered.contains(';') || !(has_keyword_prefix(&lowered, "select") || has_keyword_prefix(&lowered, "with")) {
        return Err(Error::QueryRejected(
            "only SELECT/WITH queries are allowed".to_string(),
        ));
    }
    Ok(sql)
}

fn has_keyword_prefix(sql: &str, keyword: &str) -> bool {
    match sql.strip_prefix(keyword) {
        Some(rest) => rest.is_empty() || rest.starts_with([' ', '\n', '\t', '\r']),
        None => false,
    }
}

/// Append `limit N` unless `limit` is zero or the query already has one.
pub fn apply_limit(sql: &str, limit: usize) -> String {
    if limit == 0 || sql.to_ascii_lowercase().contains(" limit ") {
        return sql.to_string();
    }
    format!("{} limit {limit}", sql.trim())
}

/// Parse a caller-supplied row limit. Empty means no limit.
pub fn parse_limit(raw: &str) -> Result<usize> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    let limit: i64 = raw
        .parse()
        .map_err(|_| Error::QueryRejected("limit must be an integer".to_string()))?;
    usize::try_from(limit).map_err(|_| Error::QueryRejected("limit must be >= 0".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_select_and_with_only() {
        assert_eq!(validate_sql("  SELECT 1 ").unwrap(), "SELECT 1");
        assert!(validate_sql("with t as (select 1) select * from t").is_ok());
        assert!(validate_sql("select\n*\nfrom runtime_metrics").is_ok());

        for bad in [
            "",
            "   ",
            "delete from runtime_metrics",
            "selective",
            "select 1; drop table runtime_metrics",
            "(select 1)",
        ] {
            assert!(matches!(validate_sql(bad), Err(Error::QueryRejected(_))), "{bad}");
        }
    }

    #[test]
    fn limit_is_appended_once() {
        assert_eq!(apply_limit("select * from t", 10), "select * from t limit 10");
        assert_eq!(apply_limit("select * from t LIMIT 5 ", 10), "select * from t LIMIT 5 ");
        assert_eq!(apply_limit("select * from t", 0), "select * from t");
    }

    #[test]
    fn parses_limits() {
        assert_eq!(parse_limit("").unwrap(), 0);
        assert_eq!(parse_limit(" 25 ").unwrap(), 25);
        assert!(parse_limit("-1").is_err());
        assert!(parse_limit("ten").is_err());
    }

    #[test]
    fn error_body_omits_empty_sql() {
        let body = serde_json::to_string(&QueryErrorBody::new("sql is required", "  ")).unwrap();
        assert_eq!(body, r#"{"error":"sql is required"}"#);
    }
}
