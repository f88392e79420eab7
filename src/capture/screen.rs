use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::RgbaImage;
use xcap::Monitor;

use super::window::{capture_window, list_windows};
use super::{SourceInfo, SourceKind, SourceSelector};
use crate::error::{LapseError, LapseResult};

const MAX_CAPTURE_DIMENSION: u32 = 16384;
const MAX_CAPTURE_PIXELS: u64 = 256 * 1024 * 1024;

/// Screens and application windows reachable through xcap.
///
/// Screens are listed first with the primary display leading, so the default
/// selection records the whole primary screen.
pub struct DesktopSources {
    preferred: Option<String>,
}

impl DesktopSources {
    pub fn new() -> Self {
        Self { preferred: None }
    }

    pub fn with_preferred(source_id: impl Into<String>) -> Self {
        Self {
            preferred: Some(source_id.into()),
        }
    }

    fn list_screens() -> Result<Vec<SourceInfo>> {
        let mut monitors = Monitor::all()?;
        monitors.sort_by_key(|m| !m.is_primary());
        Ok(monitors
            .into_iter()
            .map(|m| SourceInfo::screen(m.id(), m.name().to_string(), m.width(), m.height()))
            .collect())
    }

    fn find_monitor(id: u32) -> Result<Monitor> {
        Monitor::all()?
            .into_iter()
            .find(|m| m.id() == id)
            .ok_or_else(|| anyhow!("Monitor {} not found", id))
    }
}

impl Default for DesktopSources {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceSelector for DesktopSources {
    async fn select_source(&self) -> LapseResult<String> {
        let sources = tokio::task::spawn_blocking(list_all)
            .await
            .map_err(|e| anyhow!("source enumeration panicked: {e}"))??;

        match &self.preferred {
            Some(wanted) => sources
                .iter()
                .find(|s| &s.id == wanted)
                .map(|s| s.id.clone())
                .ok_or(LapseError::SourceSelectionCancelled),
            None => sources
                .first()
                .map(|s| s.id.clone())
                .ok_or(LapseError::SourceSelectionCancelled),
        }
    }

    fn list_sources(&self) -> Result<Vec<SourceInfo>> {
        list_all()
    }

    fn snapshot(&self, source: &SourceInfo) -> Result<RgbaImage> {
        let id = source
            .native_id()
            .ok_or_else(|| anyhow!("Malformed source id {}", source.id))?;
        let img = match source.kind {
            SourceKind::Screen => Self::find_monitor(id)?.capture_image()?,
            SourceKind::Window => capture_window(id)?,
        };

        if img.width() > MAX_CAPTURE_DIMENSION || img.height() > MAX_CAPTURE_DIMENSION {
            return Err(anyhow!("Captured image dimensions exceed safety limit"));
        }
        let pixel_count = (img.width() as u64).saturating_mul(img.height() as u64);
        if pixel_count > MAX_CAPTURE_PIXELS {
            return Err(anyhow!("Captured image exceeds maximum pixel count"));
        }

        Ok(img)
    }
}

fn list_all() -> Result<Vec<SourceInfo>> {
    let mut sources = DesktopSources::list_screens()?;
    // Window enumeration can be denied (e.g. missing screen recording
    // permission) while screens still work.
    match list_windows() {
        Ok(windows) => sources.extend(windows),
        Err(e) => tracing::warn!(error = %e, "Window enumeration failed"),
    }
    Ok(sources)
}
