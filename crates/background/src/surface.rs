//! Access to the user's active browsing surface (page, tab, window).
//!
//! The host process does not render pages itself. Whatever embeds it
//! supplies a [`SurfaceHost`]; without one every call reports that no
//! surface is active.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use shared::CoreError;
use std::sync::LazyLock;

pub const NO_ACTIVE_SURFACE: &str = "No active tab found.";
pub const NOT_A_VIDEO_PAGE: &str = "Not a YouTube video page or no active tab.";
pub const TRANSCRIPT_FAILED: &str = "Failed to get YouTube transcript.";

static VIDEO_WATCH_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://([a-z0-9-]+\.)*youtube\.com/watch\b")
        .expect("video watch pattern is valid")
});

/// The page currently in front of the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSurface {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Page content as returned by `extractPageContent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
    pub html: String,
    pub text: String,
    pub title: String,
    pub url: String,
}

#[async_trait]
pub trait SurfaceHost: Send + Sync {
    /// The active surface, if any
    async fn active_surface(&self) -> Option<ActiveSurface>;

    async fn extract_content(&self, surface: &ActiveSurface) -> Result<PageContent, CoreError>;

    /// Transcript text of the video playing on `surface`
    async fn request_transcript(&self, surface: &ActiveSurface) -> Result<String, CoreError>;

    /// Text the user has highlighted, if the host can tell
    async fn selected_text(&self, _surface: &ActiveSurface) -> Result<Option<String>, CoreError> {
        Ok(None)
    }
}

/// Used when nothing is attached to the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSurfaces;

#[async_trait]
impl SurfaceHost for DetachedSurfaces {
    async fn active_surface(&self) -> Option<ActiveSurface> {
        None
    }

    async fn extract_content(&self, _surface: &ActiveSurface) -> Result<PageContent, CoreError> {
        Err(CoreError::Surface(NO_ACTIVE_SURFACE.to_string()))
    }

    async fn request_transcript(&self, _surface: &ActiveSurface) -> Result<String, CoreError> {
        Err(CoreError::Surface(TRANSCRIPT_FAILED.to_string()))
    }
}

/// True for video watch pages (`youtube.com/watch?...`)
pub fn is_video_watch_url(url: &str) -> bool {
    VIDEO_WATCH_URL.is_match(&url.to_ascii_lowercase())
}
