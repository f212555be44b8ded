use crate::paths::AppPaths;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 2;
pub const DEFAULT_WORKERS_PER_TASK: usize = 2;
pub const DEFAULT_REFERER: &str = "https://hanime1.me/";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";

const MAX_CONCURRENT_TASKS_CAP: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub download_dir: Option<PathBuf>,
    pub max_concurrent_tasks: usize,
    pub workers_per_task: usize,
    pub referer: String,
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            workers_per_task: DEFAULT_WORKERS_PER_TASK,
            referer: DEFAULT_REFERER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn effective_download_dir(&self, paths: &AppPaths) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| paths.default_download_dir())
    }

    pub fn clamped_max_concurrent_tasks(&self) -> usize {
        self.max_concurrent_tasks.clamp(1, MAX_CONCURRENT_TASKS_CAP)
    }
}

pub fn load_config(paths: &AppPaths) -> Result<EngineConfig> {
    let path = paths.config_path();
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let bytes = std::fs::read(&path)?;
    let parsed: EngineConfig = serde_json::from_slice(&bytes)?;
    Ok(parsed)
}

pub fn save_config(paths: &AppPaths, config: &EngineConfig) -> Result<()> {
    let path = paths.config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}
