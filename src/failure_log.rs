use crate::paths::AppPaths;
use chrono::Local;
use std::io::Write;

/// Appends one line to the current day's failure log. Write-only; nothing in
/// the engine ever reads these files back. Errors are swallowed so a full
/// disk cannot take down a download worker.
pub fn log_failure(paths: &AppPaths, filename_or_url: &str, url: &str, error: &str) {
    let now = Local::now();
    let line = format!(
        "[{}] download failed: file: {}, url: {}, error: {}\n",
        now.format("%Y-%m-%d %H:%M:%S"),
        filename_or_url,
        url,
        error
    );

    let dir = paths.failure_logs_dir();
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    let path = dir.join(format!("{}.log", now.format("%Y-%m-%d")));
    if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
        let _ = file.write_all(line.as_bytes());
    }
}
