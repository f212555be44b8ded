use crate::log::{log_line, now_ms};
use crate::paths::AppPaths;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Failed,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Failed => "failed",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "paused" => Some(TaskStatus::Paused),
            "failed" => Some(TaskStatus::Failed),
            "completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }

    /// Statuses eligible for restoration after a process restart.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Running | TaskStatus::Paused | TaskStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Playlist,
    Video,
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub url: String,
    pub destination_dir: PathBuf,
    pub task_type: TaskType,
    pub status: TaskStatus,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    #[serde(default)]
    pub total_videos: usize,
    #[serde(default)]
    pub completed_videos: BTreeSet<String>,
    #[serde(default)]
    pub failed_videos: BTreeSet<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
}

impl TaskRecord {
    pub fn new(
        task_id: impl Into<String>,
        url: impl Into<String>,
        destination_dir: PathBuf,
        task_type: TaskType,
        status: TaskStatus,
    ) -> Self {
        let now = now_ms();
        Self {
            task_id: task_id.into(),
            url: url.into(),
            destination_dir,
            task_type,
            status,
            title: None,
            created_at_ms: now,
            updated_at_ms: now,
            total_videos: 0,
            completed_videos: BTreeSet::new(),
            failed_videos: BTreeSet::new(),
            retry_count: 0,
            last_error: None,
            parent_task_id: None,
        }
    }
}

/// Durable record of every unfinished or problematic task, kept as a single
/// hand-editable JSON document. The in-memory map is authoritative for the
/// session; a store that cannot be written degrades to in-memory tracking
/// rather than failing the calling operation.
pub struct TaskStore {
    paths: AppPaths,
    inner: Mutex<BTreeMap<String, TaskRecord>>,
}

impl TaskStore {
    pub fn open(paths: AppPaths) -> Self {
        let map = match std::fs::read(paths.task_store_path()) {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, TaskRecord>>(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    log_line(
                        &paths,
                        "store",
                        "error",
                        "store_parse_failed",
                        serde_json::json!({ "error": e.to_string() }),
                    );
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            paths,
            inner: Mutex::new(map),
        }
    }

    pub fn create(&self, record: TaskRecord) {
        let mut map = self.inner.lock().expect("store lock");
        map.insert(record.task_id.clone(), record);
        self.persist(&map);
    }

    /// Merges a mutation into an existing record and refreshes `updated_at`.
    /// No-op if the task no longer exists.
    pub fn update<F: FnOnce(&mut TaskRecord)>(&self, task_id: &str, mutate: F) {
        let mut map = self.inner.lock().expect("store lock");
        if let Some(record) = map.get_mut(task_id) {
            mutate(record);
            record.updated_at_ms = now_ms();
            self.persist(&map);
        }
    }

    pub fn set_total_videos(&self, task_id: &str, n: usize) {
        self.update(task_id, |record| record.total_videos = n);
    }

    pub fn set_title(&self, task_id: &str, title: &str) {
        self.update(task_id, |record| record.title = Some(title.to_string()));
    }

    pub fn mark_video_completed(&self, task_id: &str, video_url: &str) {
        self.update(task_id, |record| {
            record.failed_videos.remove(video_url);
            record.completed_videos.insert(video_url.to_string());
        });
    }

    pub fn mark_video_failed(&self, task_id: &str, video_url: &str, error: &str) {
        self.update(task_id, |record| {
            record.completed_videos.remove(video_url);
            record.failed_videos.insert(video_url.to_string());
            record.last_error = Some(error.to_string());
            record.status = TaskStatus::Failed;
        });
    }

    /// Completing a task with no failed videos deletes its record: durable
    /// storage holds only unfinished or problematic tasks.
    pub fn set_status(&self, task_id: &str, status: TaskStatus) {
        let mut map = self.inner.lock().expect("store lock");
        let Some(record) = map.get_mut(task_id) else {
            return;
        };
        if status == TaskStatus::Completed {
            if record.failed_videos.is_empty() {
                map.remove(task_id);
            } else {
                record.status = TaskStatus::Failed;
                record.updated_at_ms = now_ms();
            }
        } else {
            record.status = status;
            record.updated_at_ms = now_ms();
        }
        self.persist(&map);
    }

    pub fn remove(&self, task_id: &str) {
        let mut map = self.inner.lock().expect("store lock");
        if map.remove(task_id).is_some() {
            self.persist(&map);
        }
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.lock().expect("store lock").get(task_id).cloned()
    }

    pub fn list_resumable(&self) -> Vec<TaskRecord> {
        self.inner
            .lock()
            .expect("store lock")
            .values()
            .filter(|record| record.status.is_resumable())
            .cloned()
            .collect()
    }

    /// Dedupe check for failed-video sub-tasks: one sub-task per
    /// (parent_task_id, video_url).
    pub fn has_child_for(&self, parent_task_id: &str, video_url: &str) -> bool {
        self.inner
            .lock()
            .expect("store lock")
            .values()
            .any(|record| {
                record.parent_task_id.as_deref() == Some(parent_task_id)
                    && record.url == video_url
            })
    }

    fn persist(&self, map: &BTreeMap<String, TaskRecord>) {
        if let Err(e) = self.write_to_disk(map) {
            log_line(
                &self.paths,
                "store",
                "error",
                "store_write_failed",
                serde_json::json!({ "error": e.to_string() }),
            );
        }
    }

    fn write_to_disk(&self, map: &BTreeMap<String, TaskRecord>) -> std::io::Result<()> {
        let path = self.paths.task_store_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(map)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, format!("{json}\n"))?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &std::path::Path) -> TaskStore {
        TaskStore::open(AppPaths::new(dir.to_path_buf()))
    }

    fn playlist_record(task_id: &str) -> TaskRecord {
        TaskRecord::new(
            task_id,
            format!("https://example.com/list/{task_id}"),
            PathBuf::from("/tmp/downloads"),
            TaskType::Playlist,
            TaskStatus::Pending,
        )
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = store_in(dir.path());
            store.create(playlist_record("t1"));
            store.set_total_videos("t1", 5);
        }

        let store = store_in(dir.path());
        let record = store.get("t1").expect("t1 present");
        assert_eq!(record.total_videos, 5);
        assert_eq!(record.status, TaskStatus::Pending);
    }

    #[test]
    fn completed_and_failed_sets_stay_disjoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.create(playlist_record("t1"));

        store.mark_video_failed("t1", "v1", "http 500");
        store.mark_video_completed("t1", "v1");
        let record = store.get("t1").expect("t1");
        assert!(record.completed_videos.contains("v1"));
        assert!(record.failed_videos.is_empty());

        store.mark_video_failed("t1", "v1", "http 500 again");
        let record = store.get("t1").expect("t1");
        assert!(record.failed_videos.contains("v1"));
        assert!(record.completed_videos.is_empty());
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some("http 500 again"));
    }

    #[test]
    fn completing_a_clean_task_deletes_its_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.create(playlist_record("t1"));
        store.mark_video_completed("t1", "v1");

        store.set_status("t1", TaskStatus::Completed);
        assert!(store.get("t1").is_none());

        // And the deletion is durable.
        let store = store_in(dir.path());
        assert!(store.get("t1").is_none());
    }

    #[test]
    fn completing_with_failures_degrades_to_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.create(playlist_record("t1"));
        store.mark_video_failed("t1", "v1", "nope");

        store.set_status("t1", TaskStatus::Completed);
        let record = store.get("t1").expect("retained");
        assert_eq!(record.status, TaskStatus::Failed);
    }

    #[test]
    fn list_resumable_skips_nothing_but_absent_tasks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        for (id, status) in [
            ("a", TaskStatus::Pending),
            ("b", TaskStatus::Running),
            ("c", TaskStatus::Paused),
            ("d", TaskStatus::Failed),
        ] {
            let mut record = playlist_record(id);
            record.status = status;
            store.create(record);
        }

        let resumable = store.list_resumable();
        assert_eq!(resumable.len(), 4);
    }

    #[test]
    fn update_on_missing_task_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.set_total_videos("ghost", 3);
        assert!(store.get("ghost").is_none());
    }

    #[test]
    fn child_dedupe_matches_parent_and_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());

        let mut child = TaskRecord::new(
            "c1",
            "https://example.com/v/3",
            PathBuf::from("/tmp/downloads"),
            TaskType::Video,
            TaskStatus::Paused,
        );
        child.parent_task_id = Some("t1".to_string());
        store.create(child);

        assert!(store.has_child_for("t1", "https://example.com/v/3"));
        assert!(!store.has_child_for("t1", "https://example.com/v/4"));
        assert!(!store.has_child_for("t2", "https://example.com/v/3"));
    }

    #[test]
    fn corrupt_store_file_degrades_to_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.store_dir()).expect("dirs");
        std::fs::write(paths.task_store_path(), "{ not json").expect("write junk");

        let store = TaskStore::open(paths);
        assert!(store.list_resumable().is_empty());
        store.create(playlist_record("t1"));
        assert!(store.get("t1").is_some());
    }
}
