//! URL list loading and filename derivation.

use std::path::Path;

use reqwest::Url;

use crate::error::Result;

/// Parses a URL list: one URL per line, blank lines and `#` comments skipped.
#[must_use]
pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

/// Reads and parses the URL list at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn load_url_list(path: &Path) -> Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(parse_url_list(&text))
}

/// Derives a local file name from a URL.
///
/// Uses the last non-empty path segment (query and fragment are never part
/// of it) with path separators replaced. URLs without a usable segment get a unique
/// `download_<uuid>.bin` name.
#[must_use]
pub fn file_name_from_url(raw: &str) -> String {
    let Ok(url) = Url::parse(raw.trim()) else {
        return fallback_name();
    };
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .and_then(sanitize)
        .unwrap_or_else(fallback_name)
}

fn sanitize(segment: &str) -> Option<String> {
    let name = segment.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.replace(['\\', '/'], "-"))
}

fn fallback_name() -> String {
    format!("download_{}.bin", uuid::Uuid::new_v4().simple())
}
