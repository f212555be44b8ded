use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("playlist resolution timed out for {0}")]
    ResolutionTimeout(String),

    #[error("no videos found at {0}")]
    NoVideosFound(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("unknown task id: {0}")]
    TaskNotFound(String),

    #[error("task {task_id} cannot go from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
