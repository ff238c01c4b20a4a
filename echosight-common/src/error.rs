//! Common error types for EchoSight

use thiserror::Error;

/// Common result type for EchoSight operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across EchoSight services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store row shape could not be reconciled with the record shape
    #[error("Schema error: {0}")]
    Schema(String),
}
