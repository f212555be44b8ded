use crate::config::EngineConfig;
use crate::control::TaskControl;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSender};
use crate::failure_log::log_failure;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::log::log_line;
use crate::paths::AppPaths;
use crate::resolve::{PlaylistResolver, ResolvedPlaylist, VideoResolver};
use crate::sanitize::sanitize_filename;
use crate::store::{TaskRecord, TaskStore, TaskType};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use url::Url;

const STOP_CHECK_SLICE_MS: u64 = 100;

/// Timing and retry knobs for one job. Defaults match production behavior;
/// tests shrink them.
#[derive(Debug, Clone)]
pub struct RunnerTuning {
    pub playlist_timeout_ms: u64,
    pub video_page_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_video_attempts: u32,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub stop_join_timeout_ms: u64,
}

impl Default for RunnerTuning {
    fn default() -> Self {
        Self {
            playlist_timeout_ms: 30_000,
            video_page_timeout_ms: 20_000,
            poll_interval_ms: 1_000,
            max_video_attempts: 3,
            backoff_min_ms: 1_000,
            backoff_max_ms: 4_000,
            jitter_min_ms: 500,
            jitter_max_ms: 1_500,
            stop_join_timeout_ms: 5_000,
        }
    }
}

/// Everything a job needs, shared between the orchestrator and its runners.
pub struct EngineContext {
    pub paths: AppPaths,
    pub config: EngineConfig,
    pub tuning: RunnerTuning,
    pub store: Arc<TaskStore>,
    pub events: EventSender,
    pub playlists: Arc<dyn PlaylistResolver>,
    pub videos: Arc<dyn VideoResolver>,
    pub fetcher: Arc<dyn Fetcher>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// All videos were attempted; the listed URLs exhausted their retries.
    Completed { failed_video_urls: Vec<String> },
    /// The playlist never resolved (timeout, error, or zero links).
    ResolutionFailed { error: String },
    /// Cooperative stop; not an error and never retried automatically.
    Stopped,
}

pub fn spawn_job(
    ctx: Arc<EngineContext>,
    record: TaskRecord,
    control: Arc<TaskControl>,
    on_finished: Box<dyn FnOnce(JobOutcome) + Send + 'static>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let outcome = run_job(&ctx, &record, &control);
        on_finished(outcome);
    })
}

/// Executes one task to its terminal summary. Never panics outward; every
/// failure mode is folded into the returned outcome.
pub fn run_job(ctx: &EngineContext, record: &TaskRecord, control: &TaskControl) -> JobOutcome {
    let task_id = record.task_id.as_str();
    ctx.events.log(task_id, format!("starting download task: {}", record.url));
    log_line(
        &ctx.paths,
        task_id,
        "info",
        "task_started",
        serde_json::json!({ "url": record.url, "type": record.task_type }),
    );

    let video_urls = match record.task_type {
        TaskType::Video => vec![record.url.clone()],
        TaskType::Playlist | TaskType::Retry => {
            match resolve_playlist_with_deadline(ctx, record, control) {
                Ok(playlist) => {
                    let kept: Vec<String> = playlist
                        .video_urls
                        .iter()
                        .filter(|link| is_video_link(link))
                        .cloned()
                        .collect();
                    if kept.is_empty() {
                        let error = EngineError::NoVideosFound(record.url.clone()).to_string();
                        ctx.events.log(task_id, "no video links found");
                        fail_resolution(ctx, task_id, &error);
                        return JobOutcome::ResolutionFailed { error };
                    }
                    if let Some(title) = &playlist.title {
                        ctx.store.set_title(task_id, title);
                        ctx.events.emit(EngineEvent::TitleResolved {
                            task_id: task_id.to_string(),
                            title: title.clone(),
                        });
                    }
                    kept
                }
                Err(ResolveAbort::Stopped) => return JobOutcome::Stopped,
                Err(ResolveAbort::Failed(error)) => {
                    ctx.events.log(task_id, format!("playlist resolution failed: {error}"));
                    fail_resolution(ctx, task_id, &error);
                    return JobOutcome::ResolutionFailed { error };
                }
            }
        }
    };

    ctx.store.set_total_videos(task_id, video_urls.len());
    ctx.events.log(task_id, format!("found {} videos", video_urls.len()));

    if std::fs::create_dir_all(&record.destination_dir).is_err() {
        let error = format!(
            "cannot create destination directory {}",
            record.destination_dir.display()
        );
        fail_resolution(ctx, task_id, &error);
        return JobOutcome::ResolutionFailed { error };
    }

    let failed = fan_out_downloads(ctx, record, control, video_urls);

    if !control.is_running() {
        ctx.events.log(task_id, "download task stopped");
        log_line(&ctx.paths, task_id, "info", "task_stopped", serde_json::json!({}));
        return JobOutcome::Stopped;
    }

    ctx.events.log(task_id, format!("download task finished: {}", record.url));
    log_line(
        &ctx.paths,
        task_id,
        "info",
        "task_finished",
        serde_json::json!({ "failed": failed.len() }),
    );
    JobOutcome::Completed { failed_video_urls: failed }
}

enum ResolveAbort {
    Stopped,
    Failed(String),
}

fn resolve_playlist_with_deadline(
    ctx: &EngineContext,
    record: &TaskRecord,
    control: &TaskControl,
) -> std::result::Result<ResolvedPlaylist, ResolveAbort> {
    let deadline = Instant::now() + Duration::from_millis(ctx.tuning.playlist_timeout_ms);
    loop {
        control.wait_if_paused();
        if !control.is_running() {
            return Err(ResolveAbort::Stopped);
        }
        match ctx.playlists.poll_playlist(&record.url) {
            Ok(Some(playlist)) => return Ok(playlist),
            Ok(None) => {}
            Err(e) => return Err(ResolveAbort::Failed(e.to_string())),
        }
        if Instant::now() >= deadline {
            return Err(ResolveAbort::Failed(
                EngineError::ResolutionTimeout(record.url.clone()).to_string(),
            ));
        }
        sleep_unless_stopped(control, ctx.tuning.poll_interval_ms);
    }
}

fn fail_resolution(ctx: &EngineContext, task_id: &str, error: &str) {
    ctx.store.update(task_id, |record| {
        record.status = crate::store::TaskStatus::Failed;
        record.last_error = Some(error.to_string());
    });
    log_line(
        &ctx.paths,
        task_id,
        "error",
        "resolution_failed",
        serde_json::json!({ "error": error }),
    );
}

struct JobShared {
    queue: Mutex<VecDeque<String>>,
    failed: Mutex<Vec<String>>,
}

fn fan_out_downloads(
    ctx: &EngineContext,
    record: &TaskRecord,
    control: &TaskControl,
    video_urls: Vec<String>,
) -> Vec<String> {
    let workers = ctx.config.workers_per_task.clamp(1, 8).min(video_urls.len().max(1));
    let shared = Arc::new(JobShared {
        queue: Mutex::new(video_urls.into_iter().collect()),
        failed: Mutex::new(Vec::new()),
    });

    thread::scope(|scope| {
        for _ in 0..workers {
            let shared = shared.clone();
            scope.spawn(move || worker_loop(ctx, record, control, &shared));
        }
    });

    let mut failed = shared.failed.lock().expect("failed list lock").clone();
    failed.sort();
    failed
}

fn worker_loop(ctx: &EngineContext, record: &TaskRecord, control: &TaskControl, shared: &JobShared) {
    loop {
        control.wait_if_paused();
        if !control.is_running() {
            return;
        }

        let video_url = {
            let mut queue = shared.queue.lock().expect("queue lock");
            match queue.pop_front() {
                Some(url) => url,
                None => return,
            }
        };

        // Spread request starts out so the site never sees a burst.
        let jitter = rand::thread_rng()
            .gen_range(ctx.tuning.jitter_min_ms..=ctx.tuning.jitter_max_ms.max(ctx.tuning.jitter_min_ms));
        if !sleep_unless_stopped(control, jitter) {
            return;
        }

        match download_video(ctx, record, control, &video_url) {
            VideoResult::Completed => {
                ctx.store.mark_video_completed(&record.task_id, &video_url);
                ctx.events.log(&record.task_id, format!("downloaded {video_url}"));
            }
            VideoResult::Stopped => return,
            VideoResult::Failed { filename, error } => {
                ctx.store.mark_video_failed(&record.task_id, &video_url, &error);
                log_failure(
                    &ctx.paths,
                    filename.as_deref().unwrap_or(&video_url),
                    &video_url,
                    &error,
                );
                log_line(
                    &ctx.paths,
                    &record.task_id,
                    "error",
                    "video_failed",
                    serde_json::json!({ "url": video_url, "error": error }),
                );
                ctx.events
                    .log(&record.task_id, format!("download failed: {video_url} ({error})"));
                shared.failed.lock().expect("failed list lock").push(video_url);
            }
        }
    }
}

enum VideoResult {
    Completed,
    Stopped,
    Failed { filename: Option<String>, error: String },
}

/// One video, retried up to the attempt bound with randomized backoff.
fn download_video(
    ctx: &EngineContext,
    record: &TaskRecord,
    control: &TaskControl,
    video_url: &str,
) -> VideoResult {
    let mut last_error = String::from("download failed");
    let mut last_filename: Option<String> = None;

    for attempt in 1..=ctx.tuning.max_video_attempts {
        control.wait_if_paused();
        if !control.is_running() {
            return VideoResult::Stopped;
        }
        ctx.events.log(
            &record.task_id,
            format!(
                "downloading {video_url} (attempt {attempt}/{})",
                ctx.tuning.max_video_attempts
            ),
        );

        match download_video_attempt(ctx, record, control, video_url) {
            AttemptResult::Completed => return VideoResult::Completed,
            AttemptResult::Stopped => return VideoResult::Stopped,
            AttemptResult::Failed { filename, error } => {
                if filename.is_some() {
                    last_filename = filename;
                }
                last_error = error;
                if attempt < ctx.tuning.max_video_attempts {
                    let backoff = rand::thread_rng().gen_range(
                        ctx.tuning.backoff_min_ms
                            ..=ctx.tuning.backoff_max_ms.max(ctx.tuning.backoff_min_ms),
                    );
                    if !sleep_unless_stopped(control, backoff) {
                        return VideoResult::Stopped;
                    }
                }
            }
        }
    }

    VideoResult::Failed {
        filename: last_filename,
        error: last_error,
    }
}

enum AttemptResult {
    Completed,
    Stopped,
    Failed { filename: Option<String>, error: String },
}

fn download_video_attempt(
    ctx: &EngineContext,
    record: &TaskRecord,
    control: &TaskControl,
    video_url: &str,
) -> AttemptResult {
    let deadline = Instant::now() + Duration::from_millis(ctx.tuning.video_page_timeout_ms);
    let resolved = loop {
        control.wait_if_paused();
        if !control.is_running() {
            return AttemptResult::Stopped;
        }
        match ctx.videos.poll_video(video_url) {
            Ok(Some(resolved)) => break resolved,
            Ok(None) => {}
            Err(e) => {
                return AttemptResult::Failed {
                    filename: None,
                    error: e.to_string(),
                }
            }
        }
        if Instant::now() >= deadline {
            return AttemptResult::Failed {
                filename: None,
                error: EngineError::ResolutionTimeout(video_url.to_string()).to_string(),
            };
        }
        sleep_unless_stopped(control, ctx.tuning.poll_interval_ms);
    };

    let filename = sanitize_filename(&resolved.suggested_filename);
    let destination = record.destination_dir.join(&filename);

    // A file already at the destination counts as downloaded; never re-fetch.
    if destination.is_file() {
        ctx.events
            .log(&record.task_id, format!("already downloaded, skipping: {filename}"));
        return AttemptResult::Completed;
    }

    let task_id = record.task_id.clone();
    let progress_url = video_url.to_string();
    let events = ctx.events.clone();
    let mut on_progress = move |percent: u8| {
        events.emit(EngineEvent::Progress {
            task_id: task_id.clone(),
            video_url: progress_url.clone(),
            percent,
        });
    };

    match ctx
        .fetcher
        .fetch(&resolved.media_url, &destination, &mut on_progress, control)
    {
        Ok(FetchOutcome::Completed) => AttemptResult::Completed,
        Ok(FetchOutcome::Stopped) => AttemptResult::Stopped,
        Err(e) => AttemptResult::Failed {
            filename: Some(filename),
            error: e.to_string(),
        },
    }
}

/// Search-result links show up inside playlist markup; they are not videos.
fn is_video_link(link: &str) -> bool {
    if link.contains("search?query") {
        return false;
    }
    if let Ok(parsed) = Url::parse(link) {
        if parsed.path().trim_end_matches('/').ends_with("/search") {
            return false;
        }
    }
    true
}

/// Sleeps in short slices so a stop lands within ~100ms. Returns false if the
/// task was stopped mid-sleep.
fn sleep_unless_stopped(control: &TaskControl, total_ms: u64) -> bool {
    let mut remaining = total_ms;
    while remaining > 0 {
        if !control.is_running() {
            return false;
        }
        let slice = remaining.min(STOP_CHECK_SLICE_MS);
        thread::sleep(Duration::from_millis(slice));
        remaining -= slice;
    }
    control.is_running()
}
