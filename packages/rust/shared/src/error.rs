//! Error types for nbci.
//!
//! Library crates use [`NbciError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all nbci operations.
#[derive(Debug, thiserror::Error)]
pub enum NbciError {
    /// Configuration loading or validation error. Always fatal for a run.
    #[error("config error: {message}")]
    Config { message: String },

    /// A `git` invocation failed or produced unusable output.
    #[error("git error: {0}")]
    Git(String),

    /// Notebook document could not be parsed or transformed.
    #[error("notebook error: {message}")]
    Notebook { message: String },

    /// Upload or download against the object store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Remote or local notebook execution failed.
    #[error("execution error: {0}")]
    Execution(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Data validation error (invalid replacement map, bad URI, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NbciError>;

impl NbciError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a notebook error from any displayable message.
    pub fn notebook(msg: impl Into<String>) -> Self {
        Self::Notebook {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
