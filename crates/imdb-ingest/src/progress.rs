//! Progress indicators for downloads and table loads
//!
//! Every constructor takes a `visible` flag; hidden bars still count, so
//! callers never branch on whether progress is shown.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const DOWNLOAD_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})";
const LINES_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} lines ({eta})";

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn new_bar(total: u64, visible: bool) -> ProgressBar {
    if visible {
        ProgressBar::new(total)
    } else {
        ProgressBar::hidden()
    }
}

/// Byte progress for a file download; `size` is 0 when the server sends no length
pub fn create_download_progress(size: u64, message: &str, visible: bool) -> ProgressBar {
    let pb = new_bar(size, visible);
    pb.set_length(size);
    pb.set_style(bar_style(DOWNLOAD_TEMPLATE));
    pb.set_message(message.to_string());
    pb
}

/// Line progress for loading one table
pub fn create_load_progress(total_lines: u64, message: &str, visible: bool) -> ProgressBar {
    let pb = new_bar(total_lines, visible);
    pb.set_length(total_lines);
    pb.set_style(bar_style(LINES_TEMPLATE));
    pb.set_message(message.to_string());
    pb
}

/// Spinner for steps of unknown length
pub fn create_spinner(message: &str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
