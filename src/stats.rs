//! Bandwidth statistics shared by download workers and the reporter.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::format::{format_bitrate, format_bytes, format_duration};

/// Process-wide byte counters for one run.
///
/// The three cells are updated independently with atomic operations; they are
/// not jointly consistent. A reader may see `total_bytes` already including a
/// chunk whose rate has not yet reached `peak_bps`.
#[derive(Debug)]
pub struct Aggregator {
    start_time: Instant,
    interval_bytes: AtomicU64,
    total_bytes: AtomicU64,
    /// `f64` bit pattern of the peak rate in bits per second.
    peak_bps: AtomicU64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    /// Creates an aggregator whose clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            interval_bytes: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            peak_bps: AtomicU64::new(0),
        }
    }

    /// Records `n` transferred bytes. Zero is a no-op.
    pub fn add_bytes(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.interval_bytes.fetch_add(n, Ordering::Relaxed);
        self.total_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Returns the bytes recorded since the previous call and resets the
    /// interval counter to zero.
    pub fn swap_interval_bytes(&self) -> u64 {
        self.interval_bytes.swap(0, Ordering::AcqRel)
    }

    /// Total bytes recorded over the aggregator's lifetime.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Time since the aggregator was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average rate in bits per second since creation.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_bps(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            (self.total_bytes() as f64 * 8.0) / secs
        } else {
            0.0
        }
    }

    /// Raises the stored peak to `bps` if it is strictly greater.
    ///
    /// Non-positive, NaN and infinite samples are ignored.
    pub fn update_peak(&self, bps: f64) {
        if !bps.is_finite() || bps <= 0.0 {
            return;
        }
        let new_bits = bps.to_bits();
        let mut current = self.peak_bps.load(Ordering::Relaxed);
        loop {
            if bps <= f64::from_bits(current) {
                return;
            }
            match self.peak_bps.compare_exchange_weak(
                current,
                new_bits,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Highest rate passed to [`update_peak`](Self::update_peak), in bits per second.
    #[must_use]
    pub fn peak_bps(&self) -> f64 {
        f64::from_bits(self.peak_bps.load(Ordering::Relaxed))
    }

    /// Takes a snapshot of the run's statistics.
    #[must_use]
    pub fn summary(&self) -> Summary {
        Summary {
            total_bytes: self.total_bytes(),
            elapsed: self.elapsed(),
            average_bps: self.average_bps(),
            peak_bps: self.peak_bps(),
        }
    }
}

/// Exponentially weighted moving average of a series of samples.
#[derive(Debug, Clone)]
pub struct Ewma {
    alpha: f64,
    value: Option<f64>,
}

impl Ewma {
    /// Smoothing factor used when the requested one is out of range.
    pub const DEFAULT_ALPHA: f64 = 0.25;

    /// Creates a smoother with factor `alpha`; values outside `(0, 1)` fall
    /// back to [`DEFAULT_ALPHA`](Self::DEFAULT_ALPHA).
    #[must_use]
    pub fn new(alpha: f64) -> Self {
        let alpha = if alpha > 0.0 && alpha < 1.0 {
            alpha
        } else {
            Self::DEFAULT_ALPHA
        };
        Self { alpha, value: None }
    }

    /// Feeds one observation and returns the smoothed value.
    ///
    /// The first finite observation seeds the average. Non-finite
    /// observations leave it unchanged.
    pub fn update(&mut self, observation: f64) -> f64 {
        if !observation.is_finite() {
            return self.value();
        }
        let next = match self.value {
            None => observation,
            Some(prev) => self.alpha.mul_add(observation, (1.0 - self.alpha) * prev),
        };
        self.value = Some(next);
        next
    }

    /// Current smoothed value, or zero before the first observation.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }
}

impl Default for Ewma {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ALPHA)
    }
}

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Final statistics for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// Total bytes transferred.
    pub total_bytes: u64,
    /// Wall-clock time since the aggregator was created.
    pub elapsed: Duration,
    /// Average rate in bits per second.
    pub average_bps: f64,
    /// Peak sampled rate in bits per second.
    pub peak_bps: f64,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{SEPARATOR}")?;
        writeln!(f, "Download Summary")?;
        writeln!(f, "{SEPARATOR}")?;
        writeln!(f, "  Total downloaded:  {}", format_bytes(self.total_bytes))?;
        writeln!(f, "  Elapsed time:      {}", format_duration(self.elapsed))?;
        writeln!(f, "  Average speed:     {}", format_bitrate(self.average_bps))?;
        writeln!(f, "  Peak speed:        {}", format_bitrate(self.peak_bps))?;
        write!(f, "{SEPARATOR}")
    }
}
