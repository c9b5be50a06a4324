//! Formatting and filesystem helpers

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

/// Width of the status view progress bar, in cells
pub const PROGRESS_BAR_WIDTH: usize = 12;

/// Human readable byte count with two decimals ("1.50MB")
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{:.2}{}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2}TB", size)
}

/// Compact duration: "1h02m03s", "4m05s" or "6s"
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Remaining time at the current speed, "∞" when it cannot be estimated
pub fn format_eta(downloaded: u64, total: u64, speed: u64) -> String {
    if speed == 0 || total <= downloaded {
        return "∞".to_string();
    }
    format_duration(Duration::from_secs((total - downloaded) / speed))
}

/// Fixed-width bar of filled and empty cells for a 0-100 percentage
pub fn progress_bar(percent: f64, width: usize) -> String {
    let percent = if percent.is_finite() {
        percent.clamp(0.0, 100.0)
    } else {
        0.0
    };
    let filled = ((width as f64) * percent / 100.0) as usize;
    let filled = filled.min(width);
    format!("{}{}", "▧".repeat(filled), "□".repeat(width - filled))
}

/// Remove a file or directory tree, treating "already gone" as success
///
/// Other failures are logged and swallowed so cleanup paths never fail.
pub async fn remove_path_quietly(path: &Path) {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to stat path for removal");
            return;
        }
    };

    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    match result {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove path");
        }
    }
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
