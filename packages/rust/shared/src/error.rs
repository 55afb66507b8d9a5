//! Error types for atomdoc.
//!
//! Library crates use [`AtomdocError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all atomdoc operations.
#[derive(Debug, thiserror::Error)]
pub enum AtomdocError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// An external capability call failed or timed out after retries.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// A proposed segmentation failed reconstruction or delimiter checks.
    #[error("invalid segmentation: {message}")]
    InvalidSegmentation { message: String },

    /// A summary came back without a required field.
    #[error("incomplete summary: {message}")]
    SummaryIncomplete { message: String },

    /// Failed to parse a capability response (JSON shape, enum value, etc.).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A tree invariant was violated (missing node, bad level, duplicate id).
    #[error("tree error: {message}")]
    Tree { message: String },

    /// Data validation error (schema mismatch, invalid input format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The job was cancelled before this operation could complete.
    #[error("job cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AtomdocError>;

impl AtomdocError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a tree error from any displayable message.
    pub fn tree(msg: impl Into<String>) -> Self {
        Self::Tree {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a segmentation error from any displayable message.
    pub fn segmentation(msg: impl Into<String>) -> Self {
        Self::InvalidSegmentation {
            message: msg.into(),
        }
    }

    /// Create an incomplete-summary error from any displayable message.
    pub fn summary(msg: impl Into<String>) -> Self {
        Self::SummaryIncomplete {
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
