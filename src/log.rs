use crate::paths::AppPaths;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Appends one structured line to a task's diagnostic log. Best-effort:
/// diagnostics must never fail an operation that would otherwise succeed.
pub fn log_line(paths: &AppPaths, task_id: &str, level: &str, event: &str, data: serde_json::Value) {
    let line = serde_json::json!({
        "ts_ms": now_ms(),
        "task_id": task_id,
        "level": level,
        "event": event,
        "data": data
    })
    .to_string();

    let dir = paths.task_logs_dir();
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    let path = dir.join(format!("{task_id}.jsonl"));
    if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
        let _ = file.write_all(format!("{line}\n").as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_lines_are_one_json_object_per_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());

        log_line(&paths, "t1", "info", "task_started", serde_json::json!({"url": "u"}));
        log_line(&paths, "t1", "error", "store_write_failed", serde_json::json!({}));

        let contents =
            std::fs::read_to_string(paths.task_logs_dir().join("t1.jsonl")).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: serde_json::Value = serde_json::from_str(line).expect("valid json");
            assert_eq!(parsed["task_id"], "t1");
            assert!(parsed["ts_ms"].as_i64().is_some());
        }
    }
}
