//! Error types for export-stream.
//!
//! The decoder and dispatcher are total and never fail; errors only come
//! from the session read loop and from invalid output definitions.

use thiserror::Error;

/// Main error type for all export-stream operations.
#[derive(Debug, Error)]
pub enum ExportError {
    /// I/O error while reading the export stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while parsing output definitions or configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An integer or string output definition that cannot be attached.
    #[error("Invalid output: {0}")]
    InvalidOutput(String),
}

/// Result type alias using ExportError.
pub type Result<T> = std::result::Result<T, ExportError>;
