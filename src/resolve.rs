use crate::Result;

/// One successful playlist-page resolution.
#[derive(Debug, Clone)]
pub struct ResolvedPlaylist {
    pub video_urls: Vec<String>,
    pub title: Option<String>,
}

/// One successful video-page resolution.
#[derive(Debug, Clone)]
pub struct ResolvedVideo {
    pub media_url: String,
    pub suggested_filename: String,
}

/// Browser-driving playlist resolution, implemented outside the engine.
///
/// The runner polls once per second under a hard deadline so pause and stop
/// stay responsive while a page (or an anti-bot challenge) is still loading.
/// `Ok(None)` means "not ready yet, poll again"; an error aborts resolution.
pub trait PlaylistResolver: Send + Sync {
    fn poll_playlist(&self, url: &str) -> Result<Option<ResolvedPlaylist>>;
}

/// Browser-driving video-page resolution; same polling contract.
pub trait VideoResolver: Send + Sync {
    fn poll_video(&self, video_url: &str) -> Result<Option<ResolvedVideo>>;
}
