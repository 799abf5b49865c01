//! Single-URL fetch with retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::Url;
use tokio_util::sync::CancellationToken;

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::sink::SinkHandle;
use crate::stats::Aggregator;
use crate::url::file_name_from_url;

/// Trait for receiving per-URL download events.
///
/// All methods have default no-op implementations.
pub trait DownloadProgress: Send + Sync {
    /// Called when a worker picks up a URL.
    fn on_start(&self, _url: &str) {}

    /// Called before sleeping ahead of retry number `attempt` (1-based).
    fn on_retry(&self, _url: &str, _attempt: u32, _delay: Duration, _error: &Error) {}

    /// Called when a URL has been fully fetched and committed.
    fn on_success(&self, _url: &str, _result: &DownloadResult) {}

    /// Called when a URL has failed for good.
    fn on_failure(&self, _url: &str, _error: &Error) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl DownloadProgress for NoProgress {}

/// Outcome of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    /// Where the body was saved, `None` when it was discarded.
    pub destination: Option<PathBuf>,
    /// Whether the body was discarded.
    pub discarded: bool,
}

/// Steps of a single attempt.
enum AttemptState<'a, F: FileSystem> {
    Requesting,
    Streaming {
        response: reqwest::Response,
        sink: SinkHandle<'a, F>,
    },
    Finalizing {
        sink: SinkHandle<'a, F>,
    },
}

/// Fetches one URL at a time into a fresh sink, retrying transient failures.
pub struct Downloader<F: FileSystem = TokioFileSystem> {
    client: reqwest::Client,
    aggregator: Arc<Aggregator>,
    policy: RetryPolicy,
    out_dir: Option<PathBuf>,
    progress: Arc<dyn DownloadProgress>,
    fs: F,
}

impl Downloader<TokioFileSystem> {
    /// Creates a downloader on the real file system.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        aggregator: Arc<Aggregator>,
        config: &DownloadConfig,
    ) -> Self {
        Self::with_fs(client, aggregator, config, TokioFileSystem)
    }

    /// Starts a builder seeded from `config`.
    #[must_use]
    pub fn builder(config: &DownloadConfig) -> DownloaderBuilder {
        DownloaderBuilder::new(config)
    }
}

impl<F: FileSystem> Downloader<F> {
    /// Creates a downloader with a custom file system implementation.
    #[must_use]
    pub fn with_fs(
        client: reqwest::Client,
        aggregator: Arc<Aggregator>,
        config: &DownloadConfig,
        fs: F,
    ) -> Self {
        Self {
            client,
            aggregator,
            policy: config.retry_policy(),
            out_dir: config.output_dir().map(Path::to_path_buf),
            progress: Arc::new(NoProgress),
            fs,
        }
    }

    /// Replaces the progress observer.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn DownloadProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Shared byte counters fed by this downloader.
    #[must_use]
    pub const fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Progress observer receiving this downloader's events.
    #[must_use]
    pub const fn progress(&self) -> &Arc<dyn DownloadProgress> {
        &self.progress
    }

    /// Retry policy in effect.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetches `url`, retrying per the retry policy.
    ///
    /// Cancellation is checked before every attempt, raced against every
    /// attempt and backoff sleep, and checked again after a failed attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] as soon as `token` fires, the first
    /// non-retryable error, or the last error once the retry budget is spent.
    pub async fn download(&self, token: &CancellationToken, url: &str) -> Result<DownloadResult> {
        let mut attempt: u32 = 0;
        loop {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            log::debug!(
                "GET {url} (attempt {}/{})",
                attempt + 1,
                self.policy.max_attempts()
            );

            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => return Err(Error::Cancelled),
                res = self.attempt(url) => res,
            };
            let err = match outcome {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.policy.decide(attempt, &err) {
                RetryDecision::NoRetry => return Err(err),
                RetryDecision::RetryAfter(delay) => {
                    attempt += 1;
                    log::warn!(
                        "{url}: {err}; retry {attempt}/{} in {delay:?}",
                        self.policy.retries
                    );
                    self.progress.on_retry(url, attempt, delay, &err);
                    tokio::select! {
                        biased;
                        () = token.cancelled() => return Err(Error::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Runs one attempt from request to commit.
    async fn attempt(&self, url: &str) -> Result<DownloadResult> {
        let mut state = AttemptState::Requesting;
        loop {
            state = match state {
                AttemptState::Requesting => {
                    let response = self.request(url).await?;
                    let sink = self.open_sink(url).await?;
                    AttemptState::Streaming { response, sink }
                }
                AttemptState::Streaming { response, mut sink } => {
                    if let Err(e) = self.stream_body(response, &mut sink).await {
                        rollback_quietly(&mut sink).await;
                        return Err(e);
                    }
                    AttemptState::Finalizing { sink }
                }
                AttemptState::Finalizing { mut sink } => {
                    let finished = match sink.close().await {
                        Ok(()) => sink.commit().await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = finished {
                        rollback_quietly(&mut sink).await;
                        return Err(e);
                    }
                    return Ok(DownloadResult {
                        destination: sink.destination().map(Path::to_path_buf),
                        discarded: sink.is_discard(),
                    });
                }
            };
        }
    }

    async fn request(&self, url: &str) -> Result<reqwest::Response> {
        let parsed = Url::parse(url).map_err(|e| Error::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let response = self.client.get(parsed).send().await.map_err(|e| {
            if e.is_builder() {
                Error::Request {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            } else {
                Error::Transport(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn open_sink(&self, url: &str) -> Result<SinkHandle<'_, F>> {
        match &self.out_dir {
            Some(dir) => SinkHandle::open_file(&self.fs, dir, &file_name_from_url(url)).await,
            None => Ok(SinkHandle::open_discard()),
        }
    }

    async fn stream_body(
        &self,
        response: reqwest::Response,
        sink: &mut SinkHandle<'_, F>,
    ) -> Result<()> {
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            self.aggregator.add_bytes(chunk.len() as u64);
        }
        Ok(())
    }
}

async fn rollback_quietly<F: FileSystem>(sink: &mut SinkHandle<'_, F>) {
    if let Err(e) = sink.rollback().await {
        log::warn!("Rollback failed: {e}");
    }
}

/// Builder for [`Downloader`].
pub struct DownloaderBuilder {
    client: Option<reqwest::Client>,
    aggregator: Option<Arc<Aggregator>>,
    progress: Option<Arc<dyn DownloadProgress>>,
    config: DownloadConfig,
}

impl DownloaderBuilder {
    /// Creates a builder seeded from `config`.
    #[must_use]
    pub fn new(config: &DownloadConfig) -> Self {
        Self {
            client: None,
            aggregator: None,
            progress: None,
            config: config.clone(),
        }
    }

    /// Sets the HTTP client. Required.
    #[must_use]
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the shared aggregator. A fresh one is created otherwise.
    #[must_use]
    pub fn aggregator(mut self, aggregator: Arc<Aggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Sets the progress observer.
    #[must_use]
    pub fn progress(mut self, progress: Arc<dyn DownloadProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Builds a downloader on the real file system.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no HTTP client was supplied.
    pub fn build(self) -> Result<Downloader> {
        self.build_with_fs(TokioFileSystem)
    }

    /// Builds a downloader on a custom file system.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no HTTP client was supplied.
    pub fn build_with_fs<F: FileSystem>(self, fs: F) -> Result<Downloader<F>> {
        let client = self
            .client
            .ok_or_else(|| Error::Configuration("HTTP client is required".to_string()))?;
        let aggregator = self.aggregator.unwrap_or_default();
        let downloader = Downloader::with_fs(client, aggregator, &self.config, fs);
        Ok(match self.progress {
            Some(progress) => downloader.with_progress(progress),
            None => downloader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_client;
    use crate::test_support::{Flaky, serve, serve_truncated};
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::TempDir;

    fn config() -> DownloadConfig {
        DownloadConfig::new()
            .with_timeout(Duration::from_secs(5))
            .with_retries(0)
            .with_retry_base_delay(Duration::from_millis(10))
    }

    fn downloader(config: &DownloadConfig) -> Downloader {
        let config = config.clone().validate().unwrap();
        Downloader::new(
            build_client(&config).unwrap(),
            Arc::new(Aggregator::new()),
            &config,
        )
    }

    #[test]
    fn no_progress_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoProgress>();
        assert_send_sync::<Downloader>();
    }

    #[test]
    fn builder_without_client_is_configuration_error() {
        let err = Downloader::builder(&config()).build().err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn builder_applies_config() {
        let aggregator = Arc::new(Aggregator::new());
        let dl = Downloader::builder(&config().with_retries(4))
            .client(reqwest::Client::new())
            .aggregator(Arc::clone(&aggregator))
            .build()
            .unwrap();
        assert_eq!(dl.retry_policy().retries, 4);
        assert!(Arc::ptr_eq(dl.aggregator(), &aggregator));
    }

    #[tokio::test]
    async fn discard_counts_bytes() {
        let flaky = Flaky::new(0, "hello world");
        let base = serve(flaky.router("/file.bin")).await;
        let dl = downloader(&config());

        let result = dl
            .download(&CancellationToken::new(), &format!("{base}/file.bin"))
            .await
            .unwrap();

        assert!(result.discarded);
        assert!(result.destination.is_none());
        assert_eq!(dl.aggregator().total_bytes(), 11);
        assert_eq!(flaky.hits(), 1);
    }

    #[tokio::test]
    async fn save_writes_final_file_only() {
        let dir = TempDir::new().unwrap();
        let flaky = Flaky::new(0, "payload");
        let base = serve(flaky.router("/data/file.bin")).await;
        let dl = downloader(&config().with_out_dir(dir.path()));

        let result = dl
            .download(&CancellationToken::new(), &format!("{base}/data/file.bin?x=1"))
            .await
            .unwrap();

        let expected = dir.path().join("file.bin");
        assert!(!result.discarded);
        assert_eq!(result.destination.as_deref(), Some(expected.as_path()));
        assert_eq!(std::fs::read(&expected).unwrap(), b"payload");
        assert!(!dir.path().join("file.bin.part").exists());
    }

    #[tokio::test]
    async fn retries_until_success() {
        let flaky = Flaky::new(2, "retry-success");
        let base = serve(flaky.router("/file.bin")).await;
        let dl = downloader(&config().with_retries(2));

        let result = dl
            .download(&CancellationToken::new(), &format!("{base}/file.bin"))
            .await;

        assert!(result.is_ok());
        assert_eq!(flaky.hits(), 3);
    }

    #[tokio::test]
    async fn status_error_without_retries() {
        let flaky = Flaky::new(usize::MAX, "");
        let base = serve(flaky.router("/file.bin")).await;
        let dl = downloader(&config());

        let err = dl
            .download(&CancellationToken::new(), &format!("{base}/file.bin"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Status { status: 502 }));
        assert_eq!(flaky.hits(), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_error() {
        let flaky = Flaky::new(usize::MAX, "");
        let base = serve(flaky.router("/file.bin")).await;
        let dl = downloader(&config().with_retries(2));

        let err = dl
            .download(&CancellationToken::new(), &format!("{base}/file.bin"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Status { status: 502 }));
        assert_eq!(flaky.hits(), 3);
    }

    #[derive(Default)]
    struct RecordingProgress {
        retries: Mutex<Vec<u32>>,
    }

    impl DownloadProgress for RecordingProgress {
        fn on_retry(&self, _url: &str, attempt: u32, _delay: Duration, _error: &Error) {
            self.retries.lock().unwrap().push(attempt);
        }
    }

    #[tokio::test]
    async fn retries_are_reported() {
        let flaky = Flaky::new(usize::MAX, "");
        let base = serve(flaky.router("/file.bin")).await;
        let progress = Arc::new(RecordingProgress::default());
        let dl = downloader(&config().with_retries(2))
            .with_progress(Arc::clone(&progress) as Arc<dyn DownloadProgress>);

        let _ = dl
            .download(&CancellationToken::new(), &format!("{base}/file.bin"))
            .await;

        assert_eq!(*progress.retries.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn malformed_url_is_not_retried() {
        let dl = downloader(&config().with_retries(5));
        let start = Instant::now();

        let err = dl
            .download(&CancellationToken::new(), "not a url")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Request { .. }));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let dl = downloader(&config());

        let err = dl
            .download(&CancellationToken::new(), &format!("http://{addr}/x"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let flaky = Flaky::new(0, "never");
        let base = serve(flaky.router("/file.bin")).await;
        let dl = downloader(&config());
        let token = CancellationToken::new();
        token.cancel();

        let err = dl
            .download(&token, &format!("{base}/file.bin"))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(flaky.hits(), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let flaky = Flaky::new(usize::MAX, "");
        let base = serve(flaky.router("/file.bin")).await;
        let dl = downloader(
            &config()
                .with_retries(3)
                .with_retry_base_delay(Duration::from_secs(10)),
        );
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = dl
            .download(&token, &format!("{base}/file.bin"))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(flaky.hits(), 1);
    }

    #[tokio::test]
    async fn truncated_body_rolls_back_and_retries() {
        let dir = TempDir::new().unwrap();
        let base = serve_truncated(100, b"partial data").await;
        let dl = downloader(&config().with_retries(1).with_out_dir(dir.path()));

        let err = dl
            .download(&CancellationToken::new(), &format!("{base}/broken.bin"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
        // Both attempts streamed 12 bytes before the connection closed.
        assert_eq!(dl.aggregator().total_bytes(), 24);
        assert!(!dir.path().join("broken.bin").exists());
        assert!(!dir.path().join("broken.bin.part").exists());
    }

    #[tokio::test]
    async fn unwritable_out_dir_is_filesystem_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let flaky = Flaky::new(0, "data");
        let base = serve(flaky.router("/file.bin")).await;
        let dl = downloader(&config().with_out_dir(blocker.join("sub")));

        let err = dl
            .download(&CancellationToken::new(), &format!("{base}/file.bin"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Filesystem { .. }));
    }
}
