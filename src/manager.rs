//! Worker pool that fans a URL list out over a bounded channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::MAX_WORKERS;
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};

/// Runs a batch of URLs through a fixed number of workers.
pub struct Manager<F: FileSystem + 'static = TokioFileSystem> {
    downloader: Arc<Downloader<F>>,
    workers: usize,
}

impl<F: FileSystem + 'static> Manager<F> {
    /// Creates a manager with `workers` workers, clamped to `1..=MAX_WORKERS`.
    #[must_use]
    pub fn new(downloader: Arc<Downloader<F>>, workers: usize) -> Self {
        Self {
            downloader,
            workers: workers.clamp(1, MAX_WORKERS),
        }
    }

    /// Number of worker tasks a run spawns.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Downloads every URL in `urls`.
    ///
    /// One feeder task queues URLs in order into a channel of capacity
    /// `2 * workers`; each worker pulls until the channel drains or `token`
    /// fires. A failed URL does not stop its worker; a URL interrupted by
    /// cancellation counts as failed and ends its worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchFailed`] if any URL failed, otherwise
    /// [`Error::Cancelled`] if `token` fired before the batch finished.
    pub async fn run(&self, token: &CancellationToken, urls: Vec<String>) -> Result<()> {
        let total = urls.len();
        log::info!("Starting {total} downloads with {} workers", self.workers);

        let (tx, rx) = mpsc::channel::<String>(self.workers.saturating_mul(2));
        let rx = Arc::new(Mutex::new(rx));
        let failed = Arc::new(AtomicUsize::new(0));

        let mut tasks = JoinSet::new();

        let feeder_token = token.clone();
        tasks.spawn(async move {
            for url in urls {
                tokio::select! {
                    biased;
                    () = feeder_token.cancelled() => break,
                    sent = tx.send(url) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        for id in 0..self.workers {
            let downloader = Arc::clone(&self.downloader);
            let rx = Arc::clone(&rx);
            let failed = Arc::clone(&failed);
            let token = token.clone();
            tasks.spawn(async move {
                worker(id, &downloader, &rx, &failed, &token).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log::error!("Worker task panicked: {e}");
            }
        }

        let failed = failed.load(Ordering::SeqCst);
        log::info!(
            "Finished {total} downloads: {} ok, {failed} failed",
            total.saturating_sub(failed)
        );

        if failed > 0 {
            Err(Error::BatchFailed { failed, total })
        } else if token.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

async fn worker<F: FileSystem>(
    id: usize,
    downloader: &Downloader<F>,
    rx: &Mutex<mpsc::Receiver<String>>,
    failed: &AtomicUsize,
    token: &CancellationToken,
) {
    log::debug!("Worker {id} started");
    let progress = downloader.progress();
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => None,
            url = async { rx.lock().await.recv().await } => url,
        };
        let Some(url) = next else {
            break;
        };

        progress.on_start(&url);
        match downloader.download(token, &url).await {
            Ok(result) => progress.on_success(&url, &result),
            Err(e) => {
                log::error!("Download failed: {url}: {e}");
                failed.fetch_add(1, Ordering::SeqCst);
                progress.on_failure(&url, &e);
                if e.is_cancelled() {
                    break;
                }
            }
        }
    }
    log::debug!("Worker {id} stopped");
}
