mod screen;
mod window;

pub use screen::DesktopSources;

use anyhow::Result;
use async_trait::async_trait;
use image::RgbaImage;
use serde::Serialize;

use crate::error::LapseResult;

const SCREEN_PREFIX: &str = "screen:";
const WINDOW_PREFIX: &str = "window:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Screen,
    Window,
}

impl SourceKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            SourceKind::Screen => "Screen",
            SourceKind::Window => "Window",
        }
    }
}

/// One capturable target as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub kind: SourceKind,
    pub width: u32,
    pub height: u32,
}

impl SourceInfo {
    pub fn screen(id: u32, name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: format!("{SCREEN_PREFIX}{id}"),
            name: name.into(),
            kind: SourceKind::Screen,
            width,
            height,
        }
    }

    pub fn window(id: u32, name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: format!("{WINDOW_PREFIX}{id}"),
            name: name.into(),
            kind: SourceKind::Window,
            width,
            height,
        }
    }

    /// Platform-native numeric id encoded in `id`.
    pub fn native_id(&self) -> Option<u32> {
        let raw = match self.kind {
            SourceKind::Screen => self.id.strip_prefix(SCREEN_PREFIX),
            SourceKind::Window => self.id.strip_prefix(WINDOW_PREFIX),
        };
        raw.and_then(|v| v.parse().ok())
    }
}

/// Resolves and enumerates capture targets.
///
/// `list_sources` and `snapshot` block on platform APIs and are called from
/// blocking worker threads by the capture loop.
#[async_trait]
pub trait SourceSelector: Send + Sync {
    /// Picks the source to record. Returns `SourceSelectionCancelled` when
    /// the user declines.
    async fn select_source(&self) -> LapseResult<String>;

    fn list_sources(&self) -> Result<Vec<SourceInfo>>;

    /// Extracts a still image of the given source.
    fn snapshot(&self, source: &SourceInfo) -> Result<RgbaImage>;
}
