//! Application-wide error types.
//!
//! This module provides a unified error hierarchy for the application.
//! Library modules use specific error types via `thiserror`, while
//! CLI/main uses `anyhow` for convenient error propagation.
//!
//! # Design
//!
//! - [`Error`]: Top-level application error enum
//! - All errors implement `std::error::Error` for compatibility
//! - Variants are tagged with whether a run-wide operation should treat
//!   them as fatal (abort the whole run) or recoverable (record against
//!   the offending item and continue)

use std::path::PathBuf;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
///
/// Aggregates errors from all subsystems for unified handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Source file does not exist or cannot be opened
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// Container/codec inspection failed to identify any audio or video stream
    #[error("probe failed for {path}: {message}")]
    ProbeFailure { path: PathBuf, message: String },

    /// File contains a video stream the target device cannot play
    #[error("unsupported video in {path}: {message}")]
    UnsupportedVideo { path: PathBuf, message: String },

    /// Decode/resample/encode pipeline failed
    #[error("transcode failed for {path}: {message}")]
    TranscodeFailure { path: PathBuf, message: String },

    /// Item matched an existing catalog entry; informational, not a failure
    #[error("duplicate of existing track: {0}")]
    DuplicateDetected(String),

    /// Copying the encoded/source file onto the device failed
    #[error("copy failed for {path}: {message}")]
    CopyFailure { path: PathBuf, message: String },

    /// Catalog could not be persisted; fatal for the whole run
    #[error("catalog write failed: {0}")]
    CatalogWriteFailure(String),

    /// Another process holds the advisory process lock; fatal, dedicated exit code
    #[error("another instance is already running (pid {0})")]
    LockContention(u32),

    /// Target device generation cannot play this media type and `--force` was not given
    #[error("device does not support this media: {0}")]
    UnsupportedDevice(String),

    /// Catalog/device metadata error
    #[error("metadata error for {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    /// Invalid file format
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a metadata error.
    pub fn metadata(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a probe failure.
    pub fn probe(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ProbeFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a transcode failure.
    pub fn transcode(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::TranscodeFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a copy failure.
    pub fn copy(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CopyFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error should abort the entire run rather than being
    /// recorded against a single item and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CatalogWriteFailure(_) | Error::LockContention(_)
        ) || matches!(self, Error::UnsupportedDevice(_))
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FileNotFound("/path/to/file.mp3".into());
        assert!(err.to_string().contains("/path/to/file.mp3"));
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::config("bad mount point").context("while parsing args");
        let msg = err.to_string();
        assert!(msg.contains("while parsing args"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::CatalogWriteFailure("disk full".into()).is_fatal());
        assert!(Error::LockContention(123).is_fatal());
        assert!(Error::UnsupportedDevice("video on nano".into()).is_fatal());
        assert!(!Error::ProbeFailure { path: "/x.mp3".into(), message: "bad".into() }.is_fatal());
        assert!(!Error::DuplicateDetected("x".into()).is_fatal());
    }

    #[test]
    fn test_metadata_error() {
        let err = Error::metadata("/music/song.mp3", "unsupported format");
        let msg = err.to_string();
        assert!(msg.contains("song.mp3"));
        assert!(msg.contains("unsupported format"));
    }
}
