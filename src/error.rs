//! Centralized error types for userdata-expand.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the userdata-expand library.
///
/// Most bad input is not an error at all: undecodable archives, failed
/// fetches and malformed entries degrade to empty content. What remains
/// here are failures with no fallback path.
#[derive(Error, Debug)]
pub enum UserDataError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An include URL could not be understood.
    #[error("Invalid include URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(String),

    /// Include/archive nesting went past the configured ceiling.
    #[error("Expansion nested deeper than the configured limit of {limit}")]
    DepthExceeded { limit: usize },
}

/// Convenience alias for `Result<T, UserDataError>`.
pub type Result<T> = std::result::Result<T, UserDataError>;

impl UserDataError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `UserDataError::io`).
impl From<std::io::Error> for UserDataError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

impl From<reqwest::Error> for UserDataError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}
