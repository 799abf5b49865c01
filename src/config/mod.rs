//! Configuration types for download runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Output directory used when saving is requested without one.
pub const DEFAULT_OUT_DIR: &str = "downloads";

/// Upper bound for the CPU-derived default worker count.
const MAX_DEFAULT_WORKERS: usize = 64;

/// Upper bound for an explicitly requested worker count.
pub const MAX_WORKERS: usize = 4096;

/// Default worker count: twice the available parallelism, clamped to `1..=64`.
#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map_or(1, |n| n.get() * 2)
        .clamp(1, MAX_DEFAULT_WORKERS)
}

/// Configuration for a download run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Number of concurrent download workers. Zero selects [`default_workers`].
    pub workers: usize,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries allowed after the first attempt.
    pub retries: u32,
    /// Backoff delay before the first retry, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Whether to persist bodies to disk instead of discarding them.
    pub save: bool,
    /// Directory for saved files. Setting it implies `save`.
    pub out_dir: Option<PathBuf>,
    /// Whether to print live bandwidth samples.
    pub progress: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_ms: 60_000,
            retries: 3,
            retry_base_delay_ms: 500,
            save: false,
            out_dir: None,
            progress: true,
        }
    }
}

impl DownloadConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of concurrent workers.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the backoff base delay.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets whether bodies are saved to disk.
    #[must_use]
    pub const fn with_save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    /// Sets the output directory (implies saving once validated).
    #[must_use]
    pub fn with_out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(dir.into());
        self
    }

    /// Sets whether live bandwidth samples are printed.
    #[must_use]
    pub const fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Retry policy derived from `retries` and `retry_base_delay_ms`.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    /// Directory files are written to, or `None` when bodies are discarded.
    #[must_use]
    pub fn output_dir(&self) -> Option<&Path> {
        if self.save {
            self.out_dir.as_deref()
        } else {
            None
        }
    }

    /// Validates the configuration and fills derived values.
    ///
    /// A zero worker count becomes [`default_workers`] and larger counts are
    /// capped at [`MAX_WORKERS`]; a non-empty output
    /// directory turns saving on; saving without a directory uses
    /// [`DEFAULT_OUT_DIR`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the timeout is zero.
    pub fn validate(mut self) -> Result<Self> {
        if self.timeout_ms == 0 {
            return Err(Error::Configuration(
                "timeout must be greater than 0".to_string(),
            ));
        }
        if self.workers == 0 {
            self.workers = default_workers();
        }
        self.workers = self.workers.min(MAX_WORKERS);
        self.out_dir = self
            .out_dir
            .take()
            .filter(|dir| !dir.as_os_str().to_string_lossy().trim().is_empty());
        if self.out_dir.is_some() {
            self.save = true;
        } else if self.save {
            self.out_dir = Some(PathBuf::from(DEFAULT_OUT_DIR));
        }
        Ok(self)
    }

    /// Location of the optional user config file.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("netperf").join("config.toml"))
    }

    /// Loads a configuration from a TOML file. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Loads the user config file if it exists, defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.is_file() => {
                log::info!("Loaded config from {}", path.display());
                Self::from_toml_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }
}
