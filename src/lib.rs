//! netperf - concurrent HTTP download throughput measurement.
//!
//! Fetches a list of URLs with a fixed pool of workers, either discarding the
//! bodies or saving them atomically through `.part` files, while a reporter
//! samples aggregate bandwidth once per second.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use netperf::{Aggregator, DownloadConfig, Downloader, Manager, Reporter};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> netperf::Result<()> {
//! let config = DownloadConfig::default().with_out_dir("downloads").validate()?;
//! let aggregator = Arc::new(Aggregator::new());
//!
//! let downloader = Downloader::builder(&config)
//!     .client(netperf::http::build_client(&config)?)
//!     .aggregator(Arc::clone(&aggregator))
//!     .build()?;
//! let manager = Manager::new(Arc::new(downloader), config.workers);
//!
//! let token = CancellationToken::new();
//! let reporter = Reporter::new(Arc::clone(&aggregator))
//!     .spawn(token.child_token(), |sample| println!("{sample}"));
//!
//! let urls = vec!["https://example.com/file.iso".to_string()];
//! let result = manager.run(&token, urls).await;
//! token.cancel();
//! let _ = reporter.await;
//!
//! println!("{}", aggregator.summary());
//! result
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod download;
pub mod error;
pub mod format;
pub mod fs;
pub mod http;
pub mod manager;
pub mod reporter;
pub mod retry;
pub mod sink;
pub mod stats;
pub mod url;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use config::DownloadConfig;
pub use download::{DownloadProgress, DownloadResult, Downloader, DownloaderBuilder, NoProgress};
pub use error::{Error, Result};
pub use format::{format_bitrate, format_bytes, format_duration};
pub use fs::{FileSystem, TokioFileSystem};
pub use manager::Manager;
pub use reporter::{BandwidthSample, Reporter};
pub use retry::{RetryDecision, RetryPolicy};
pub use sink::{SinkHandle, SinkState};
pub use stats::{Aggregator, Ewma, Summary};
