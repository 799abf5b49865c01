//! Formatting helpers for human-readable byte sizes, bitrates and durations.

use std::time::Duration;

/// Formats a byte count using IEC units (B, KiB, MiB, GiB).
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Formats a bitrate using decimal units (bit/s, Kbit/s, Mbit/s, Gbit/s).
///
/// Non-positive and non-finite rates render as `0 bit/s`.
#[must_use]
pub fn format_bitrate(bps: f64) -> String {
    const K: f64 = 1000.0;
    const M: f64 = K * 1000.0;
    const G: f64 = M * 1000.0;

    if !bps.is_finite() || bps <= 0.0 {
        return "0 bit/s".to_string();
    }
    if bps >= G {
        format!("{:.2} Gbit/s", bps / G)
    } else if bps >= M {
        format!("{:.2} Mbit/s", bps / M)
    } else if bps >= K {
        format!("{:.2} Kbit/s", bps / K)
    } else {
        format!("{bps:.0} bit/s")
    }
}

/// Formats a duration as a human-readable string (e.g. "5.0s", "1m 30s", "1h 1m 5s").
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}.{:01}s", secs, d.subsec_millis() / 100)
    }
}
