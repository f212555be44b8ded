use crate::control::TaskControl;
use crate::error::EngineError;
use crate::Result;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

const CHUNK_SIZE: usize = 8192;
const HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed,
    /// The task was stopped mid-transfer; the partial file has been removed.
    Stopped,
}

/// Streams one media URL to a destination path. Implementations must honor
/// the control at every chunk boundary: block while paused, abort and delete
/// the partial file when stopped.
pub trait Fetcher: Send + Sync {
    fn fetch(
        &self,
        media_url: &str,
        destination: &Path,
        on_progress: &mut dyn FnMut(u8),
        control: &TaskControl,
    ) -> Result<FetchOutcome>;
}

/// Production fetcher: blocking chunked GET with the configured referer and
/// user-agent, progress reported at whole-percent granularity.
pub struct HttpFetcher {
    agent: ureq::Agent,
    referer: String,
}

impl HttpFetcher {
    pub fn new(referer: &str, user_agent: &str) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(HTTP_TIMEOUT_SECS)))
            .user_agent(user_agent);
        let agent: ureq::Agent = config.build().into();
        Self {
            agent,
            referer: referer.to_string(),
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(
        &self,
        media_url: &str,
        destination: &Path,
        on_progress: &mut dyn FnMut(u8),
        control: &TaskControl,
    ) -> Result<FetchOutcome> {
        let response = self
            .agent
            .get(media_url)
            .header("Referer", &self.referer)
            .call()
            .map_err(|e| EngineError::Fetch(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(EngineError::Fetch(format!("http status {status}")));
        }

        let total_size: u64 = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let mut reader = response.into_body().into_reader();
        let mut file = match std::fs::File::create(destination) {
            Ok(f) => f,
            Err(e) => return Err(EngineError::Io(e)),
        };

        let mut downloaded: u64 = 0;
        let mut last_percent: i32 = -1;
        let mut buf = [0u8; CHUNK_SIZE];

        loop {
            control.wait_if_paused();
            if !control.is_running() {
                drop(file);
                let _ = std::fs::remove_file(destination);
                return Ok(FetchOutcome::Stopped);
            }

            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    drop(file);
                    let _ = std::fs::remove_file(destination);
                    return Err(EngineError::Fetch(e.to_string()));
                }
            };

            if let Err(e) = file.write_all(&buf[..n]) {
                drop(file);
                let _ = std::fs::remove_file(destination);
                return Err(EngineError::Io(e));
            }

            downloaded += n as u64;
            if total_size > 0 {
                let percent = ((downloaded * 100) / total_size).min(100) as i32;
                if percent > last_percent {
                    last_percent = percent;
                    on_progress(percent as u8);
                }
            }
        }

        if let Err(e) = file.flush() {
            let _ = std::fs::remove_file(destination);
            return Err(EngineError::Io(e));
        }
        if last_percent < 100 {
            on_progress(100);
        }
        Ok(FetchOutcome::Completed)
    }
}
