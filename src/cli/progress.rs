//! Console rendering of per-URL outcomes and bandwidth samples.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::{BandwidthSample, DownloadProgress, DownloadResult, Error};

/// Prints `[OK]` / `[FAIL]` lines, above a live spinner when interactive.
pub struct ConsoleProgress {
    spinner: Option<ProgressBar>,
}

impl ConsoleProgress {
    /// Creates a console printer; `interactive` enables the spinner.
    #[must_use]
    pub fn new(interactive: bool) -> Self {
        Self {
            spinner: interactive.then(make_spinner),
        }
    }

    /// Prints a status line without disturbing the spinner.
    pub fn println(&self, line: &str) {
        match &self.spinner {
            Some(bar) => bar.println(line),
            None => println!("{line}"),
        }
    }

    /// Shows a bandwidth sample in the spinner, or prints it.
    pub fn show_sample(&self, sample: &BandwidthSample) {
        match &self.spinner {
            Some(bar) => bar.set_message(sample.to_string()),
            None => println!("{sample}"),
        }
    }

    /// Clears the spinner.
    pub fn finish(&self) {
        if let Some(bar) = &self.spinner {
            bar.finish_and_clear();
        }
    }
}

impl DownloadProgress for ConsoleProgress {
    fn on_success(&self, url: &str, result: &DownloadResult) {
        self.println(&success_line(url, result));
    }

    fn on_failure(&self, url: &str, error: &Error) {
        self.println(&failure_line(url, error));
    }
}

fn make_spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(250));
    bar
}

fn success_line(url: &str, result: &DownloadResult) -> String {
    match &result.destination {
        Some(path) => format!("[OK]   {url} -> {}", path.display()),
        None => format!("[OK]   {url} (discarded)"),
    }
}

fn failure_line(url: &str, error: &Error) -> String {
    format!("[FAIL] {url} -> {error}")
}
