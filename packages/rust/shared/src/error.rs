//! Error types for cogreader.
//!
//! Library crates use [`ReaderError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all cogreader operations.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// Invalid configuration (pass count, mode combination, missing key).
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed section tree: cycle, duplicate id, inconsistent links or ordering.
    #[error("structural error: {message}")]
    Structure { message: String },

    /// A single summarizer invocation failed.
    #[error("summarization failed: {0}")]
    Summarization(String),

    /// Network/HTTP error talking to a model provider.
    #[error("network error: {0}")]
    Network(String),

    /// Input document or model response could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ReaderError>;

impl ReaderError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a structural error from any displayable message.
    pub fn structure(msg: impl Into<String>) -> Self {
        Self::Structure {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
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

    /// Whether this error points at a broken setup rather than one bad section.
    ///
    /// Terminal at the top level. Inside a pass the section still degrades to a
    /// placeholder, but the failure is logged as an error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Summarization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ReaderError::config("num_passes must be at least 1");
        assert_eq!(err.to_string(), "config error: num_passes must be at least 1");

        let err = ReaderError::structure("duplicate section id 'intro'");
        assert!(err.to_string().starts_with("structural error"));
        assert!(err.to_string().contains("'intro'"));
    }

    #[test]
    fn only_summarization_failures_are_recoverable() {
        assert!(!ReaderError::Summarization("timeout".into()).is_fatal());
        assert!(ReaderError::structure("cycle").is_fatal());
        assert!(ReaderError::config("bad").is_fatal());
        assert!(ReaderError::Network("reset".into()).is_fatal());
    }
}
