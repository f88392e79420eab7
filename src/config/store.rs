use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Mutex;

use super::{QualityTier, Settings, VideoFormat};
use crate::error::{LapseError, LapseResult};

/// Key-value view of the persisted settings used by the recorder.
pub trait SettingsStore: Send + Sync {
    fn snapshot(&self) -> LapseResult<Settings>;

    fn update(&self, patch: SettingsPatch) -> LapseResult<Settings>;

    /// Bumps the success or failure counter after a render finishes.
    fn record_render(&self, success: bool) -> LapseResult<Settings>;
}

/// Partial settings update. `None` leaves the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsPatch {
    pub interval_secs: Option<u64>,
    pub countdown: Option<bool>,
    pub countdown_secs: Option<u32>,
    pub directory: Option<PathBuf>,
    pub format: Option<VideoFormat>,
    pub quality: Option<QualityTier>,
    pub framerate: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub ask_save_path: Option<bool>,
    pub filename_template: Option<String>,
    pub ffmpeg_path: Option<PathBuf>,
    pub show_notifications: Option<bool>,
}

impl SettingsPatch {
    pub fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.interval_secs {
            settings.capture.interval_secs = v;
        }
        if let Some(v) = self.countdown {
            settings.capture.countdown = v;
        }
        if let Some(v) = self.countdown_secs {
            settings.capture.countdown_secs = v;
        }
        if let Some(v) = self.directory {
            settings.output.directory = v;
        }
        if let Some(v) = self.format {
            settings.output.format = v;
        }
        if let Some(v) = self.quality {
            settings.output.quality = v;
        }
        if let Some(v) = self.framerate {
            settings.output.framerate = v;
        }
        if let Some(v) = self.width {
            settings.output.width = v;
        }
        if let Some(v) = self.height {
            settings.output.height = v;
        }
        if let Some(v) = self.ask_save_path {
            settings.output.ask_save_path = v;
        }
        if let Some(v) = self.filename_template {
            settings.output.filename_template = v;
        }
        if let Some(v) = self.ffmpeg_path {
            settings.encoder.ffmpeg_path = v;
        }
        if let Some(v) = self.show_notifications {
            settings.ui.show_notifications = v;
        }
    }
}

/// The single owner of the live settings. Every mutation is validated and,
/// when file-backed, written through to disk.
pub struct SettingsService {
    current: Mutex<Settings>,
    path: Option<PathBuf>,
}

impl SettingsService {
    /// Loads from the platform config path, falling back to defaults.
    pub fn load() -> LapseResult<Self> {
        let path = Settings::config_path()
            .ok_or_else(|| LapseError::settings("no config directory available"))?;
        Self::load_from(path)
    }

    pub fn load_from(path: PathBuf) -> LapseResult<Self> {
        let settings = Settings::load_from(&path).map_err(|e| LapseError::settings(e.to_string()))?;
        Ok(Self {
            current: Mutex::new(settings),
            path: Some(path),
        })
    }

    pub fn in_memory(settings: Settings) -> Self {
        Self {
            current: Mutex::new(settings),
            path: None,
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    fn mutate(&self, f: impl FnOnce(&mut Settings)) -> LapseResult<Settings> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = current.clone();
        f(&mut next);
        next.validate()
            .map_err(|e| LapseError::settings(e.to_string()))?;
        if let Some(path) = &self.path {
            next.save_to(path)
                .map_err(|e| LapseError::settings(e.to_string()))?;
        }
        *current = next.clone();
        Ok(next)
    }
}

impl SettingsStore for SettingsService {
    fn snapshot(&self) -> LapseResult<Settings> {
        Ok(self.current.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn update(&self, patch: SettingsPatch) -> LapseResult<Settings> {
        let settings = self.mutate(|s| patch.apply(s))?;
        tracing::info!(path = ?self.path, "Settings updated");
        Ok(settings)
    }

    fn record_render(&self, success: bool) -> LapseResult<Settings> {
        self.mutate(|s| {
            if success {
                s.stats.successful_renders += 1;
            } else {
                s.stats.failed_renders += 1;
            }
        })
    }
}
