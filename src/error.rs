//! Error types for the netperf library.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during download operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The downloader or the run was set up with missing or invalid settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The request could not be built (malformed URL, unsupported scheme).
    #[error("invalid request for {url}: {reason}")]
    Request {
        /// The offending URL.
        url: String,
        /// Why the request could not be built.
        reason: String,
    },

    /// Connection, timeout or body read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a status outside `200..300`.
    #[error("unexpected status {status}")]
    Status {
        /// HTTP status code returned by the server.
        status: u16,
    },

    /// A sink could not be opened, written, committed or rolled back.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        /// Path the operation was acting on.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The run was cancelled before the operation completed.
    #[error("operation cancelled")]
    Cancelled,

    /// One or more downloads of a batch failed.
    #[error("{failed} of {total} downloads failed")]
    BatchFailed {
        /// Number of URLs that failed.
        failed: usize,
        /// Number of URLs in the batch.
        total: usize,
    },

    /// I/O error outside of a sink (reading the URL list, config file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file could not be parsed.
    #[error("invalid config file: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Wraps an I/O failure on `path` as a [`Error::Filesystem`].
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error is the cancellation signal.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if another attempt could plausibly succeed.
    ///
    /// Transport, status and sink failures consume a retry slot; malformed
    /// requests, configuration problems and cancellation never do.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Status { .. } | Self::Filesystem { .. }
        )
    }
}

/// A specialized `Result` type for netperf operations.
pub type Result<T> = std::result::Result<T, Error>;
