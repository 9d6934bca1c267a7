//! Common error types for postrelay

use thiserror::Error;

/// Common result type for postrelay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across postrelay crates
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger database error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input (unparsable time, missing column, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Spreadsheet read or write failure
    #[error("Spreadsheet error: {0}")]
    Sheet(String),

    /// Debug-bridge or automation command failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
