use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hot store error: {0}")]
    Db(#[from] duckdb::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("timestamp out of range: {0}")]
    TimestampRange(String),

    #[error("query rejected: {0}")]
    QueryRejected(String),

    #[error("query exceeded deadline of {0:?}")]
    QueryTimeout(std::time::Duration),

    #[error("worker thread failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, Error>;
