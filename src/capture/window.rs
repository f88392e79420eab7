use anyhow::{anyhow, Result};
use image::RgbaImage;
use xcap::Window;

use super::SourceInfo;

const MIN_WINDOW_SIZE: u32 = 50;

pub(super) fn list_windows() -> Result<Vec<SourceInfo>> {
    let windows = Window::all()?;
    let mut app_windows: Vec<SourceInfo> = windows
        .into_iter()
        .filter(|w| {
            !w.title().is_empty()
                && w.width() > MIN_WINDOW_SIZE
                && w.height() > MIN_WINDOW_SIZE
                && !w.is_minimized()
        })
        .map(|w| {
            let name = if w.app_name().is_empty() {
                w.title().to_string()
            } else {
                format!("{} - {}", w.app_name(), w.title())
            };
            SourceInfo::window(w.id(), name, w.width(), w.height())
        })
        .collect();

    app_windows.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(app_windows)
}

/// Minimized windows are filtered out of `list_windows`, so the capture loop
/// sees them as a vanished source before ever reaching this.
pub(super) fn capture_window(window_id: u32) -> Result<RgbaImage> {
    let window = Window::all()?
        .into_iter()
        .find(|w| w.id() == window_id)
        .ok_or_else(|| anyhow!("Window {} not found", window_id))?;
    if window.is_minimized() {
        return Err(anyhow!("Window {} is minimized", window_id));
    }
    Ok(window.capture_image()?)
}
