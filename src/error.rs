//! Error types for atlas-upsert
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using UpsertError
pub type Result<T> = std::result::Result<T, UpsertError>;

/// Unified error type for upsert metadata operations
#[derive(Debug, Error)]
pub enum UpsertError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Snapshot Errors
    // -------------------------------------------------------------------------
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Snapshot corruption detected: {0}")]
    SnapshotCorrupt(String),

    // -------------------------------------------------------------------------
    // Segment Errors
    // -------------------------------------------------------------------------
    #[error("Segment error: {0}")]
    Segment(String),

    #[error("Upsert not enabled for segment: {0}")]
    UpsertNotEnabled(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Preload Errors
    // -------------------------------------------------------------------------
    #[error("Preload failed for segment {segment}: {reason}")]
    Preload { segment: String, reason: String },

    // -------------------------------------------------------------------------
    // Executor Errors
    // -------------------------------------------------------------------------
    #[error("Executor error: {0}")]
    Executor(String),
}

impl From<bincode::Error> for UpsertError {
    fn from(e: bincode::Error) -> Self {
        UpsertError::Serialization(e.to_string())
    }
}
