//! Periodic bandwidth sampling.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::format::{format_bitrate, format_bytes};
use crate::stats::{Aggregator, Ewma};

/// Sampling period used unless overridden.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// One reporter tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthSample {
    /// Rate over the last interval, bits per second.
    pub now_bps: f64,
    /// Smoothed rate, bits per second.
    pub ewma_bps: f64,
    /// Average rate since the run started, bits per second.
    pub average_bps: f64,
    /// Bytes transferred so far.
    pub total_bytes: u64,
}

impl fmt::Display for BandwidthSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[BW] now={}  ewma={}  avg={}  total={}",
            format_bitrate(self.now_bps),
            format_bitrate(self.ewma_bps),
            format_bitrate(self.average_bps),
            format_bytes(self.total_bytes)
        )
    }
}

/// Turns the aggregator's interval counter into a stream of samples.
#[derive(Debug)]
pub struct Reporter {
    aggregator: Arc<Aggregator>,
    ewma: Ewma,
    interval: Duration,
}

impl Reporter {
    /// Creates a reporter sampling `aggregator` every [`DEFAULT_INTERVAL`].
    #[must_use]
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self {
            aggregator,
            ewma: Ewma::default(),
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Sets the sampling period. A zero period keeps the current one.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval;
        }
        self
    }

    /// Sampling period.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Takes one sample now, treating the bytes since the previous tick as
    /// spanning one interval. Also advances the aggregator's peak.
    #[allow(clippy::cast_precision_loss)]
    pub fn tick(&mut self) -> BandwidthSample {
        let bytes = self.aggregator.swap_interval_bytes();
        let now_bps = (bytes as f64 * 8.0) / self.interval.as_secs_f64();
        let ewma_bps = self.ewma.update(now_bps);
        self.aggregator.update_peak(now_bps);
        BandwidthSample {
            now_bps,
            ewma_bps,
            average_bps: self.aggregator.average_bps(),
            total_bytes: self.aggregator.total_bytes(),
        }
    }

    /// Samples once per interval until `token` is cancelled.
    pub async fn run<S>(mut self, token: CancellationToken, mut on_sample: S)
    where
        S: FnMut(&BandwidthSample),
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let sample = self.tick();
                    on_sample(&sample);
                }
            }
        }
        log::debug!("Reporter stopped");
    }

    /// Runs [`run`](Self::run) on a new tokio task.
    pub fn spawn<S>(self, token: CancellationToken, on_sample: S) -> JoinHandle<()>
    where
        S: FnMut(&BandwidthSample) + Send + 'static,
    {
        tokio::spawn(self.run(token, on_sample))
    }
}
