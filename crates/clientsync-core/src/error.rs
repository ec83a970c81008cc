// crates/clientsync-core/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed record: {0}")]
    DataShape(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Consistency check failed for row {row_id}: {details}")]
    Consistency { row_id: i64, details: String },

    #[error("Both stores failed during {operation}: database: {database}; csv: {csv}")]
    BothStoresFailed {
        operation: String,
        database: String,
        csv: String,
    },
}

pub type Result<T> = std::result::Result<T, MigrationError>;
