// src/error.rs

use thiserror::Error;

/// Core error types for Tapcask
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Descriptor or metadata parse failure
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Archive download failure
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Downloaded bytes do not match the descriptor's digest
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Install-mapping execution failure
    #[error("Install error: {0}")]
    InstallError(String),

    /// Smoke test did not produce the expected outcome
    #[error("Smoke test failed: {0}")]
    SmokeTestError(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// Entity already exists or would be overwritten
    #[error("Conflict: {0}")]
    ConflictError(String),
}

/// Result type alias using Tapcask's Error type
pub type Result<T> = std::result::Result<T, Error>;
