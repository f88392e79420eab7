mod store;

pub use store::{SettingsPatch, SettingsService, SettingsStore};

use anyhow::{anyhow, Result};
use chrono::format::{Item, StrftimeItems};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

pub const CAPTURE_INTERVALS: &[u64] = &[1, 2, 3, 4, 5];
pub const FRAMERATES: &[u32] = &[12, 24, 30, 60];

const DEFAULT_INTERVAL_SECS: u64 = 2;
const DEFAULT_FRAMERATE: u32 = 30;
const MIN_COUNTDOWN_SECS: u32 = 1;
const MAX_COUNTDOWN_SECS: u32 = 10;
const MAX_DIMENSION: u32 = 7680;
const MAX_FILENAME_TEMPLATE_LEN: usize = 128;
const DEFAULT_FILENAME_TEMPLATE: &str = "lapse-%Y%m%d-%H%M%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub capture: CaptureConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub stats: RenderStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureConfig {
    pub interval_secs: u64,
    pub countdown: bool,
    #[serde(default = "default_countdown_secs")]
    pub countdown_secs: u32,
}

fn default_countdown_secs() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub format: VideoFormat,
    pub quality: QualityTier,
    pub framerate: u32,
    pub width: u32,
    pub height: u32,
    pub ask_save_path: bool,
    pub filename_template: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub ffmpeg_path: PathBuf,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiConfig {
    pub show_notifications: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            show_notifications: true,
        }
    }
}

/// Running totals of finished renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenderStats {
    pub successful_renders: u64,
    pub failed_renders: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    Mp4,
    Mkv,
    Avi,
    Webm,
}

impl VideoFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            VideoFormat::Mp4 => "mp4",
            VideoFormat::Mkv => "mkv",
            VideoFormat::Avi => "avi",
            VideoFormat::Webm => "webm",
        }
    }

    pub fn all() -> &'static [VideoFormat] {
        &[
            VideoFormat::Mp4,
            VideoFormat::Mkv,
            VideoFormat::Avi,
            VideoFormat::Webm,
        ]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            VideoFormat::Mp4 => "MP4",
            VideoFormat::Mkv => "Matroska",
            VideoFormat::Avi => "AVI",
            VideoFormat::Webm => "WebM",
        }
    }
}

/// Named output quality preset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum QualityTier {
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "8k")]
    P4320,
    #[serde(rename = "4k")]
    P2160,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "270p")]
    P270,
    #[serde(rename = "144p")]
    P144,
}

impl QualityTier {
    pub fn all() -> &'static [QualityTier] {
        &[
            QualityTier::Auto,
            QualityTier::P4320,
            QualityTier::P2160,
            QualityTier::P1080,
            QualityTier::P720,
            QualityTier::P480,
            QualityTier::P360,
            QualityTier::P270,
            QualityTier::P144,
        ]
    }

    /// x264 constant rate factor for the tier. Lower is higher quality.
    pub fn crf(&self) -> u8 {
        match self {
            QualityTier::Auto => 25,
            QualityTier::P4320 => 6,
            QualityTier::P2160 => 12,
            QualityTier::P1080 => 18,
            QualityTier::P720 => 24,
            QualityTier::P480 => 32,
            QualityTier::P360 => 38,
            QualityTier::P270 => 42,
            QualityTier::P144 => 48,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QualityTier::Auto => "auto",
            QualityTier::P4320 => "8k",
            QualityTier::P2160 => "4k",
            QualityTier::P1080 => "1080p",
            QualityTier::P720 => "720p",
            QualityTier::P480 => "480p",
            QualityTier::P360 => "360p",
            QualityTier::P270 => "270p",
            QualityTier::P144 => "144p",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|tier| tier.name() == name)
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if !CAPTURE_INTERVALS.contains(&self.capture.interval_secs) {
            return Err(anyhow!(
                "interval_secs must be one of {:?}",
                CAPTURE_INTERVALS
            ));
        }
        if self.capture.countdown_secs < MIN_COUNTDOWN_SECS
            || self.capture.countdown_secs > MAX_COUNTDOWN_SECS
        {
            return Err(anyhow!(
                "countdown_secs must be between {} and {}",
                MIN_COUNTDOWN_SECS,
                MAX_COUNTDOWN_SECS
            ));
        }
        if !FRAMERATES.contains(&self.output.framerate) {
            return Err(anyhow!("framerate must be one of {:?}", FRAMERATES));
        }
        if self.output.width == 0
            || self.output.height == 0
            || self.output.width > MAX_DIMENSION
            || self.output.height > MAX_DIMENSION
        {
            return Err(anyhow!(
                "output dimensions must be between 1 and {}",
                MAX_DIMENSION
            ));
        }
        if self.output.directory.as_os_str().is_empty() {
            return Err(anyhow!("output directory path is empty"));
        }
        if self.output.filename_template.len() > MAX_FILENAME_TEMPLATE_LEN {
            return Err(anyhow!("filename_template too long"));
        }
        if self.output.filename_template.contains('/')
            || self.output.filename_template.contains('\\')
            || self.output.filename_template.contains("..")
        {
            return Err(anyhow!("filename_template contains invalid path characters"));
        }
        if !template_parses(&self.output.filename_template) {
            return Err(anyhow!("filename_template is not a valid date format"));
        }
        if self.encoder.ffmpeg_path.as_os_str().is_empty() {
            return Err(anyhow!("ffmpeg_path is empty"));
        }
        Ok(())
    }

    pub(crate) fn sanitize(&mut self) {
        if !CAPTURE_INTERVALS.contains(&self.capture.interval_secs) {
            self.capture.interval_secs = DEFAULT_INTERVAL_SECS;
        }
        self.capture.countdown_secs = self
            .capture
            .countdown_secs
            .clamp(MIN_COUNTDOWN_SECS, MAX_COUNTDOWN_SECS);
        if !FRAMERATES.contains(&self.output.framerate) {
            self.output.framerate = DEFAULT_FRAMERATE;
        }
        self.output.width = self.output.width.clamp(1, MAX_DIMENSION);
        self.output.height = self.output.height.clamp(1, MAX_DIMENSION);

        if self.output.filename_template.len() > MAX_FILENAME_TEMPLATE_LEN
            || self.output.filename_template.contains('/')
            || self.output.filename_template.contains('\\')
            || self.output.filename_template.contains("..")
            || !template_parses(&self.output.filename_template)
        {
            self.output.filename_template = DEFAULT_FILENAME_TEMPLATE.to_string();
        }
        if self.encoder.ffmpeg_path.as_os_str().is_empty() {
            self.encoder = EncoderConfig::default();
        }
    }
}

/// chrono only reports a bad specifier when formatting, so check up front.
fn template_parses(template: &str) -> bool {
    !StrftimeItems::new(template).any(|item| matches!(item, Item::Error))
}

impl Default for Settings {
    fn default() -> Self {
        let documents_dir = directories::UserDirs::new()
            .and_then(|d| d.document_dir().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| {
                directories::BaseDirs::new()
                    .map(|b| b.home_dir().to_path_buf())
                    .unwrap_or_else(|| PathBuf::from("."))
            });

        Self {
            capture: CaptureConfig {
                interval_secs: DEFAULT_INTERVAL_SECS,
                countdown: true,
                countdown_secs: default_countdown_secs(),
            },
            output: OutputConfig {
                directory: documents_dir.join("lapse"),
                format: VideoFormat::Mp4,
                quality: QualityTier::Auto,
                framerate: DEFAULT_FRAMERATE,
                width: 1920,
                height: 1080,
                ask_save_path: false,
                filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
            },
            encoder: EncoderConfig::default(),
            ui: UiConfig::default(),
            stats: RenderStats::default(),
        }
    }
}

impl Settings {
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "lapse", "lapse").map(|p| p.config_dir().to_path_buf())
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.toml"))
    }

    pub fn log_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "lapse", "lapse").map(|p| p.data_dir().join("logs"))
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let mut settings: Settings = toml::from_str(&content)?;
            settings.sanitize();
            settings.validate()?;
            return Ok(settings);
        }
        Ok(Settings::default())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        self.validate()?;
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn ensure_output_dir(&self) -> Result<()> {
        let dir = &self.output.directory;
        if dir.as_os_str().is_empty() {
            return Err(anyhow!("Output directory path is empty"));
        }

        let dir_str = dir.to_string_lossy();
        if dir_str.contains("..") {
            return Err(anyhow!("Output directory contains path traversal"));
        }

        #[cfg(windows)]
        {
            if dir_str.starts_with("\\\\") {
                return Err(anyhow!("Network paths are not allowed"));
            }
        }

        fs::create_dir_all(dir)?;
        Ok(())
    }

    pub fn generate_filename(&self) -> String {
        let now = chrono::Local::now();
        let mut formatted = String::new();
        if write!(formatted, "{}", now.format(&self.output.filename_template)).is_err() {
            formatted.clear();
        }
        let sanitized: String = formatted
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .take(200)
            .collect();
        let safe_name = if sanitized.is_empty() {
            format!("lapse-{}", now.timestamp_millis())
        } else {
            sanitized
        };
        format!("{}.{}", safe_name, self.output.format.extension())
    }

    /// Default render target before collision probing.
    pub fn output_path(&self) -> PathBuf {
        self.output.directory.join(self.generate_filename())
    }
}
