use crate::control::TaskControl;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::log::log_line;
use crate::runner::{spawn_job, EngineContext, JobOutcome};
use crate::store::{TaskRecord, TaskStatus, TaskType};
use crate::Result;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct ActiveJob {
    control: Arc<TaskControl>,
    handle: Option<JoinHandle<()>>,
}

struct PendingEntry {
    task_id: String,
    paused: bool,
}

/// The active set and the pending queue live behind one mutex so that
/// admission checks and queue mutations are a single critical section.
/// Check-then-act on counts outside the lock is exactly the race this
/// design exists to rule out.
struct Inner {
    active: HashMap<String, ActiveJob>,
    pending: VecDeque<PendingEntry>,
}

impl Inner {
    /// Paused runners hold no admission slot; only live, unpaused ones count.
    fn unpaused_active(&self) -> usize {
        self.active
            .values()
            .filter(|job| job.control.is_running() && !job.control.is_paused())
            .count()
    }
}

/// Owns every live job and the queue of jobs waiting for a slot. The single
/// writer allowed to move a task between "known to the store" and "running".
pub struct Orchestrator {
    ctx: Arc<EngineContext>,
    inner: Mutex<Inner>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            inner: Mutex::new(Inner {
                active: HashMap::new(),
                pending: VecDeque::new(),
            }),
        })
    }

    /// Creates a playlist task and either starts it immediately or queues it,
    /// depending on free admission slots. With no explicit destination the
    /// configured download directory is used.
    pub fn submit(self: &Arc<Self>, url: &str, destination_dir: Option<PathBuf>) -> String {
        let destination_dir = destination_dir
            .unwrap_or_else(|| self.ctx.config.effective_download_dir(&self.ctx.paths));
        let task_id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().expect("orchestrator lock");

        if inner.unpaused_active() < self.ctx.config.clamped_max_concurrent_tasks() {
            let record = TaskRecord::new(
                task_id.clone(),
                url,
                destination_dir,
                TaskType::Playlist,
                TaskStatus::Running,
            );
            self.ctx.store.create(record.clone());
            self.start_locked(&mut inner, record);
        } else {
            let record = TaskRecord::new(
                task_id.clone(),
                url,
                destination_dir,
                TaskType::Playlist,
                TaskStatus::Pending,
            );
            self.ctx.store.create(record);
            inner.pending.push_back(PendingEntry {
                task_id: task_id.clone(),
                paused: false,
            });
        }
        task_id
    }

    pub fn pause(self: &Arc<Self>, task_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("orchestrator lock");
        if let Some(job) = inner.active.get(task_id) {
            job.control.pause();
            self.ctx.store.set_status(task_id, TaskStatus::Paused);
            log_line(&self.ctx.paths, task_id, "info", "task_paused", serde_json::json!({}));
            // Pausing frees a slot.
            self.start_next_locked(&mut inner);
            return Ok(());
        }
        if let Some(entry) = inner.pending.iter_mut().find(|e| e.task_id == task_id) {
            entry.paused = true;
            self.ctx.store.set_status(task_id, TaskStatus::Paused);
            return Ok(());
        }
        Err(EngineError::TaskNotFound(task_id.to_string()))
    }

    pub fn resume(self: &Arc<Self>, task_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("orchestrator lock");
        if let Some(job) = inner.active.get(task_id) {
            job.control.resume();
            self.ctx.store.set_status(task_id, TaskStatus::Running);
            log_line(&self.ctx.paths, task_id, "info", "task_resumed", serde_json::json!({}));
            return Ok(());
        }
        if let Some(entry) = inner.pending.iter_mut().find(|e| e.task_id == task_id) {
            entry.paused = false;
            self.ctx.store.set_status(task_id, TaskStatus::Pending);
            self.start_next_locked(&mut inner);
            return Ok(());
        }
        Err(EngineError::TaskNotFound(task_id.to_string()))
    }

    /// Stops and forgets a task. For a live runner this waits a bounded time
    /// for the thread to unwind, then abandons it; the task always leaves the
    /// active set and the store either way.
    pub fn stop(self: &Arc<Self>, task_id: &str) -> Result<()> {
        let handle = {
            let mut inner = self.inner.lock().expect("orchestrator lock");
            if let Some(mut job) = inner.active.remove(task_id) {
                job.control.stop();
                job.handle.take()
            } else if let Some(pos) = inner.pending.iter().position(|e| e.task_id == task_id) {
                inner.pending.remove(pos);
                self.ctx.store.remove(task_id);
                return Ok(());
            } else {
                return Err(EngineError::TaskNotFound(task_id.to_string()));
            }
        };

        // Join outside the lock: the runner's exit callback needs it.
        if let Some(handle) = handle {
            if !join_with_timeout(handle, self.ctx.tuning.stop_join_timeout_ms) {
                log_line(
                    &self.ctx.paths,
                    task_id,
                    "warn",
                    "stop_join_timed_out",
                    serde_json::json!({ "timeout_ms": self.ctx.tuning.stop_join_timeout_ms }),
                );
            }
        }

        self.ctx.store.remove(task_id);
        log_line(&self.ctx.paths, task_id, "info", "task_removed", serde_json::json!({}));
        let mut inner = self.inner.lock().expect("orchestrator lock");
        self.start_next_locked(&mut inner);
        Ok(())
    }

    /// Re-admits a failed task, paused, and materializes one paused `video`
    /// sub-task per failed URL. Nothing starts until the user resumes, so a
    /// failing site cannot trigger a retry storm.
    pub fn retry(&self, task_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("orchestrator lock");
        let record = self
            .ctx
            .store
            .get(task_id)
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
        if record.status != TaskStatus::Failed {
            return Err(EngineError::InvalidTransition {
                task_id: task_id.to_string(),
                from: record.status.as_str().to_string(),
                to: TaskStatus::Paused.as_str().to_string(),
            });
        }

        self.materialize_failed_videos_locked(&mut inner, &record);
        self.ctx.store.update(task_id, |r| {
            r.failed_videos.clear();
            r.status = TaskStatus::Paused;
            r.task_type = TaskType::Retry;
            r.retry_count += 1;
        });
        inner.pending.push_back(PendingEntry {
            task_id: task_id.to_string(),
            paused: true,
        });
        log_line(&self.ctx.paths, task_id, "info", "task_retried", serde_json::json!({}));
        Ok(())
    }

    /// Rebuilds the queue from every resumable store record. Paused records
    /// stay paused; everything else re-enters as pending. Then drains the
    /// queue up to the concurrency cap.
    pub fn recover_on_startup(self: &Arc<Self>) {
        let mut inner = self.inner.lock().expect("orchestrator lock");
        for record in self.ctx.store.list_resumable() {
            if inner.active.contains_key(&record.task_id)
                || inner.pending.iter().any(|e| e.task_id == record.task_id)
            {
                continue;
            }
            let paused = record.status == TaskStatus::Paused;
            if !paused {
                self.ctx.store.set_status(&record.task_id, TaskStatus::Pending);
            }
            inner.pending.push_back(PendingEntry {
                task_id: record.task_id.clone(),
                paused,
            });
        }
        self.start_next_locked(&mut inner);
    }

    /// Active tasks first, then the queue in order.
    pub fn list_active_and_pending(&self) -> Vec<TaskRecord> {
        let inner = self.inner.lock().expect("orchestrator lock");
        let mut out = Vec::new();
        for task_id in inner.active.keys() {
            if let Some(record) = self.ctx.store.get(task_id) {
                out.push(record);
            }
        }
        out.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        for entry in &inner.pending {
            if let Some(record) = self.ctx.store.get(&entry.task_id) {
                out.push(record);
            }
        }
        out
    }

    fn start_locked(self: &Arc<Self>, inner: &mut Inner, record: TaskRecord) {
        let control = Arc::new(TaskControl::new());
        let orchestrator = Arc::clone(self);
        let task_id = record.task_id.clone();
        let exit_id = task_id.clone();
        let handle = spawn_job(
            Arc::clone(&self.ctx),
            record,
            Arc::clone(&control),
            Box::new(move |outcome| orchestrator.on_runner_exit(&exit_id, outcome)),
        );
        inner.active.insert(
            task_id,
            ActiveJob {
                control,
                handle: Some(handle),
            },
        );
    }

    /// Pops unpaused queue entries while admission slots are free.
    fn start_next_locked(self: &Arc<Self>, inner: &mut Inner) {
        while inner.unpaused_active() < self.ctx.config.clamped_max_concurrent_tasks() {
            let Some(pos) = inner.pending.iter().position(|e| !e.paused) else {
                return;
            };
            let entry = inner.pending.remove(pos).expect("checked position");
            let Some(record) = self.ctx.store.get(&entry.task_id) else {
                continue;
            };
            self.ctx.store.set_status(&entry.task_id, TaskStatus::Running);
            let mut record = record;
            record.status = TaskStatus::Running;
            self.start_locked(inner, record);
        }
    }

    /// Runner threads land here when a job reaches its terminal summary.
    fn on_runner_exit(self: &Arc<Self>, task_id: &str, outcome: JobOutcome) {
        let mut inner = self.inner.lock().expect("orchestrator lock");
        inner.active.remove(task_id);

        match outcome {
            JobOutcome::Stopped => {
                // stop() owns record removal.
            }
            JobOutcome::ResolutionFailed { error } => {
                self.ctx.events.emit(EngineEvent::Finished {
                    task_id: task_id.to_string(),
                    failed_video_urls: vec![],
                    error: Some(error),
                });
            }
            JobOutcome::Completed { failed_video_urls } => {
                if failed_video_urls.is_empty() {
                    // Deletes the record.
                    self.ctx.store.set_status(task_id, TaskStatus::Completed);
                } else {
                    self.ctx.store.set_status(task_id, TaskStatus::Failed);
                    if let Some(record) = self.ctx.store.get(task_id) {
                        self.materialize_failed_videos_locked(&mut inner, &record);
                    }
                }
                self.ctx.events.emit(EngineEvent::Finished {
                    task_id: task_id.to_string(),
                    failed_video_urls,
                    error: None,
                });
            }
        }
        self.start_next_locked(&mut inner);
    }

    /// One paused `video` sub-task per failed URL, at most one ever per
    /// `(parent_task_id, video_url)` pair.
    fn materialize_failed_videos_locked(&self, inner: &mut Inner, parent: &TaskRecord) {
        for video_url in &parent.failed_videos {
            if self.ctx.store.has_child_for(&parent.task_id, video_url) {
                continue;
            }
            let mut child = TaskRecord::new(
                Uuid::new_v4().to_string(),
                video_url.clone(),
                parent.destination_dir.clone(),
                TaskType::Video,
                TaskStatus::Paused,
            );
            child.parent_task_id = Some(parent.task_id.clone());
            let child_id = child.task_id.clone();
            self.ctx.store.create(child);
            inner.pending.push_back(PendingEntry {
                task_id: child_id,
                paused: true,
            });
        }
    }
}

fn join_with_timeout(handle: JoinHandle<()>, timeout_ms: u64) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if handle.is_finished() {
            let _ = handle.join();
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}
