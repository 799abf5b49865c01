//! Command-line front end: flag parsing, run wiring and exit codes.

mod progress;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::{
    Aggregator, DownloadConfig, DownloadProgress, Downloader, Error, Manager, Reporter, Result,
};

pub use progress::ConsoleProgress;

/// Exit status used when the run was interrupted with Ctrl-C.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Measure HTTP download throughput over many parallel fetches.
#[derive(Debug, Parser)]
#[command(name = "netperf", version)]
#[command(about = "Measure HTTP download throughput over many parallel fetches", long_about = None)]
pub struct Cli {
    /// File with one URL per line. Blank lines and `#` comments are skipped.
    #[arg(long, value_name = "FILE")]
    pub list: PathBuf,

    /// Save response bodies to disk instead of discarding them.
    #[arg(long)]
    pub save: bool,

    /// Output directory for saved files (implies --save).
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Number of concurrent workers (default: 2 x CPUs, at most 64).
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Per-request timeout: plain seconds or a number with `ms`, `s`, `m` or `h`.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Retries per URL after the first attempt.
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Do not print live bandwidth samples.
    #[arg(long)]
    pub no_progress: bool,

    /// Config file to load instead of the default location.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Loads the config file and applies flag overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the merged configuration is invalid.
    pub fn resolve_config(&self) -> Result<DownloadConfig> {
        let mut config = match &self.config {
            Some(path) => DownloadConfig::from_toml_file(path)?,
            None => DownloadConfig::load()?,
        };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if self.save {
            config.save = true;
        }
        if let Some(out) = &self.out {
            config.out_dir = Some(out.clone());
        }
        if self.no_progress {
            config.progress = false;
        }
        config.validate()
    }
}

/// Parses `10`, `500ms`, `45s`, `2m` or `1h` into a duration.
fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration `{text}`"))?;
    let millis = match unit.trim() {
        "ms" => Some(value),
        "" | "s" => value.checked_mul(1_000),
        "m" => value.checked_mul(60_000),
        "h" => value.checked_mul(3_600_000),
        other => return Err(format!("unknown duration unit `{other}`")),
    };
    millis
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration `{text}` is too large"))
}

/// Runs the CLI to completion and maps the outcome to a process exit code.
pub async fn run(cli: Cli) -> ExitCode {
    let token = CancellationToken::new();
    let signal = tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Received SIGINT, cancelling");
                token.cancel();
            }
        }
    });

    let result = execute(&cli, &token).await;
    signal.abort();

    if let Err(e) = &result {
        eprintln!("Error: {e}");
    }
    ExitCode::from(exit_status(&result, token.is_cancelled()))
}

/// Exit status for a finished run: 130 once interrupted, else 0 or 1.
#[must_use]
pub fn exit_status(result: &Result<()>, interrupted: bool) -> u8 {
    match result {
        _ if interrupted => EXIT_INTERRUPTED,
        Err(Error::Cancelled) => EXIT_INTERRUPTED,
        Ok(()) => 0,
        Err(_) => 1,
    }
}

async fn execute(cli: &Cli, token: &CancellationToken) -> Result<()> {
    let config = cli.resolve_config()?;
    let urls = crate::url::load_url_list(&cli.list).await?;
    if urls.is_empty() {
        return Err(Error::Configuration(format!(
            "no URLs found in {}",
            cli.list.display()
        )));
    }
    log::debug!("Resolved config: {config:?}");

    let aggregator = Arc::new(Aggregator::new());
    let ui = Arc::new(ConsoleProgress::new(
        config.progress && console::Term::stdout().is_term(),
    ));
    let downloader = Downloader::builder(&config)
        .client(crate::http::build_client(&config)?)
        .aggregator(Arc::clone(&aggregator))
        .progress(Arc::clone(&ui) as Arc<dyn DownloadProgress>)
        .build()?;
    let manager = Manager::new(Arc::new(downloader), config.workers);

    if let Some(dir) = config.output_dir() {
        ui.println(&format!("Saving to {}", dir.display()));
    }

    let reporter_token = token.child_token();
    let reporter = config.progress.then(|| {
        let ui = Arc::clone(&ui);
        Reporter::new(Arc::clone(&aggregator))
            .spawn(reporter_token.clone(), move |sample| ui.show_sample(sample))
    });

    let result = manager.run(token, urls).await;

    reporter_token.cancel();
    if let Some(handle) = reporter
        && let Err(e) = handle.await
    {
        log::warn!("Reporter task failed: {e}");
    }
    ui.finish();

    println!("\n{}", aggregator.summary());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("netperf").chain(args.iter().copied())).unwrap()
    }

    fn config_file(dir: &TempDir, text: &str) -> String {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, text).unwrap();
        path.display().to_string()
    }

    #[test]
    fn list_is_required() {
        assert!(Cli::try_parse_from(["netperf"]).is_err());
    }

    #[test]
    fn parses_all_flags() {
        let cli = parse(&[
            "--list",
            "urls.txt",
            "--save",
            "--out",
            "out",
            "--workers",
            "8",
            "--timeout",
            "10",
            "--retries",
            "1",
            "--no-progress",
        ]);
        assert_eq!(cli.list, PathBuf::from("urls.txt"));
        assert!(cli.save);
        assert_eq!(cli.out, Some(PathBuf::from("out")));
        assert_eq!(cli.workers, Some(8));
        assert_eq!(cli.timeout, Some(Duration::from_secs(10)));
        assert_eq!(cli.retries, Some(1));
        assert!(cli.no_progress);
    }

    #[test]
    fn flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let path = config_file(&dir, "workers = 3\nretries = 9\ntimeout_ms = 20000\n");
        let cli = parse(&["--list", "u", "--config", &path, "--retries", "1"]);

        let config = cli.resolve_config().unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.retries, 1);
        assert_eq!(config.timeout(), Duration::from_secs(20));
    }

    #[test]
    fn timeout_accepts_units() {
        assert_eq!(parse_duration("45s"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("10"), Ok(Duration::from_secs(10)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn sub_second_timeout_flag_reaches_config() {
        let dir = TempDir::new().unwrap();
        let path = config_file(&dir, "");
        let cli = parse(&["--list", "u", "--config", &path, "--timeout", "1500ms"]);

        let config = cli.resolve_config().unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn out_flag_enables_save() {
        let dir = TempDir::new().unwrap();
        let path = config_file(&dir, "");
        let cli = parse(&["--list", "u", "--config", &path, "--out", "dl"]);

        let config = cli.resolve_config().unwrap();
        assert!(config.save);
        assert_eq!(config.output_dir(), Some(std::path::Path::new("dl")));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = config_file(&dir, "");
        let cli = parse(&["--list", "u", "--config", &path, "--timeout", "0"]);
        assert!(matches!(
            cli.resolve_config(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn exit_statuses() {
        assert_eq!(exit_status(&Ok(()), false), 0);
        assert_eq!(
            exit_status(&Err(Error::BatchFailed { failed: 1, total: 2 }), false),
            1
        );
        assert_eq!(exit_status(&Err(Error::Cancelled), false), EXIT_INTERRUPTED);
        assert_eq!(
            exit_status(&Err(Error::BatchFailed { failed: 1, total: 2 }), true),
            EXIT_INTERRUPTED
        );
    }

    #[tokio::test]
    async fn empty_list_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("urls.txt");
        std::fs::write(&list, "# nothing here\n\n").unwrap();
        let path = config_file(&dir, "");
        let cli = parse(&["--list", &list.display().to_string(), "--config", &path]);

        let err = execute(&cli, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
