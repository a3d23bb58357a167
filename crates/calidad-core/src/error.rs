// crates/calidad-core/src/error.rs

use calidad_parser::ParserError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extraction failed: {0}")]
    Parser(#[from] ParserError),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("CSV writing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl PipelineError {
    /// True when the database could not be reached or dropped the connection.
    /// These failures abort the batch and are worth retrying; everything else is fatal.
    pub fn is_storage_unavailable(&self) -> bool {
        match self {
            PipelineError::Sqlx(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                // SQLSTATE class 08 is "connection exception", 57P0x covers server shutdown.
                sqlx::Error::Database(db_err) => db_err
                    .code()
                    .map(|code| code.starts_with("08") || code.starts_with("57P0"))
                    .unwrap_or(false),
                _ => false,
            },
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
