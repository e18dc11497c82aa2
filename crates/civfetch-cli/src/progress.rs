//! Download progress rendering.

use civfetch_core::download::{DownloadProgress, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

const TEMPLATE: &str =
    "{msg:30!} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// A byte progress bar plus the callback that drives it.
///
/// One bar is reused across files; each new file name resets it.
pub fn progress_bar() -> (ProgressBar, ProgressCallback) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let handle = bar.clone();
    let callback: ProgressCallback = Arc::new(move |p: DownloadProgress| {
        if handle.message() != p.file_name {
            handle.reset();
            handle.set_message(p.file_name.clone());
        }
        if let Some(total) = p.total_bytes {
            handle.set_length(total);
        }
        handle.set_position(p.downloaded_bytes);
    });
    (bar, callback)
}
