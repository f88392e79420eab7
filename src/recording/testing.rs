//! In-process stand-ins for every collaborator of the session controller.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::RgbaImage;
use tempfile::TempDir;

use super::{AppContext, RecorderState, SessionController};
use crate::capture::{SourceInfo, SourceSelector};
use crate::config::{Settings, SettingsPatch, SettingsService, SettingsStore, VideoFormat};
use crate::encoder::{EncodeEvent, EncodeHandle, EncodeJob, EncodeResult, VideoEncoder};
use crate::error::{LapseError, LapseResult};
use crate::frames::{self, FrameStore};
use crate::notify::{ClickAction, Notifier};
use crate::surface::{SavePrompt, TimerCountdown, TraySurface};

/// A fixed list of sources that tests can add to, remove from, and make
/// fail.
pub struct ScriptedSources {
    available: Mutex<Vec<SourceInfo>>,
    all: Vec<SourceInfo>,
    cancel_selection: Mutex<bool>,
    failing_snapshots: AtomicU32,
}

impl ScriptedSources {
    pub fn new(ids: &[u32]) -> Self {
        let all: Vec<SourceInfo> = ids
            .iter()
            .map(|id| SourceInfo::screen(*id, format!("Display {id}"), 4, 4))
            .collect();
        Self {
            available: Mutex::new(all.clone()),
            all,
            cancel_selection: Mutex::new(false),
            failing_snapshots: AtomicU32::new(0),
        }
    }

    pub fn remove(&self, id: &str) {
        self.available.lock().unwrap().retain(|s| s.id != id);
    }

    pub fn restore(&self, id: &str) {
        let mut available = self.available.lock().unwrap();
        if available.iter().any(|s| s.id == id) {
            return;
        }
        if let Some(source) = self.all.iter().find(|s| s.id == id) {
            available.push(source.clone());
        }
    }

    pub fn cancel_selection(&self, cancel: bool) {
        *self.cancel_selection.lock().unwrap() = cancel;
    }

    /// The next `n` snapshots fail.
    pub fn fail_snapshots(&self, n: u32) {
        self.failing_snapshots.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceSelector for ScriptedSources {
    async fn select_source(&self) -> LapseResult<String> {
        if *self.cancel_selection.lock().unwrap() {
            return Err(LapseError::SourceSelectionCancelled);
        }
        self.available
            .lock()
            .unwrap()
            .first()
            .map(|s| s.id.clone())
            .ok_or(LapseError::SourceSelectionCancelled)
    }

    fn list_sources(&self) -> Result<Vec<SourceInfo>> {
        Ok(self.available.lock().unwrap().clone())
    }

    fn snapshot(&self, source: &SourceInfo) -> Result<RgbaImage> {
        let failing = self
            .failing_snapshots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(anyhow!("snapshot of {} failed", source.id));
        }
        Ok(RgbaImage::from_pixel(
            source.width,
            source.height,
            image::Rgba([200, 100, 50, 255]),
        ))
    }
}

/// In-memory settings whose reads and counter writes can be made to fail.
pub struct ScriptedSettings {
    inner: SettingsService,
    snapshots_left: Mutex<Option<u32>>,
    fail_records: AtomicBool,
}

impl ScriptedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: SettingsService::in_memory(settings),
            snapshots_left: Mutex::new(None),
            fail_records: AtomicBool::new(false),
        }
    }

    /// Snapshots succeed `n` more times, then fail.
    pub fn fail_snapshots_after(&self, n: u32) {
        *self.snapshots_left.lock().unwrap() = Some(n);
    }

    pub fn fail_records(&self, fail: bool) {
        self.fail_records.store(fail, Ordering::SeqCst);
    }
}

impl SettingsStore for ScriptedSettings {
    fn snapshot(&self) -> LapseResult<Settings> {
        let mut left = self.snapshots_left.lock().unwrap();
        match left.as_mut() {
            Some(0) => return Err(LapseError::settings("settings store unavailable")),
            Some(n) => *n -= 1,
            None => {}
        }
        drop(left);
        self.inner.snapshot()
    }

    fn update(&self, patch: SettingsPatch) -> LapseResult<Settings> {
        self.inner.update(patch)
    }

    fn record_render(&self, success: bool) -> LapseResult<Settings> {
        if self.fail_records.load(Ordering::SeqCst) {
            return Err(LapseError::settings("settings file is read-only"));
        }
        self.inner.record_render(success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub title: String,
    pub body: String,
    pub clickable: bool,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent().into_iter().map(|n| n.title).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, body: &str, on_click: Option<ClickAction>) {
        self.sent.lock().unwrap().push(SentNotification {
            title: title.to_string(),
            body: body.to_string(),
            clickable: on_click.is_some(),
        });
    }
}

#[derive(Default)]
pub struct RecordingTray {
    states: Mutex<Vec<RecorderState>>,
    titles: Mutex<Vec<String>>,
}

impl RecordingTray {
    pub fn states(&self) -> Vec<RecorderState> {
        self.states.lock().unwrap().clone()
    }

    pub fn last_state(&self) -> Option<RecorderState> {
        self.states.lock().unwrap().last().copied()
    }

    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().unwrap().clone()
    }
}

impl TraySurface for RecordingTray {
    fn show_state(&self, state: RecorderState) {
        self.states.lock().unwrap().push(state);
    }

    fn set_title(&self, title: &str) {
        self.titles.lock().unwrap().push(title.to_string());
    }
}

/// What the encoder saw when it was invoked.
#[derive(Debug, Clone)]
pub struct EncodeCall {
    pub job: EncodeJob,
    pub frames_on_disk: usize,
}

/// Answers every job immediately with scripted events and result.
pub struct StubEncoder {
    calls: Mutex<Vec<EncodeCall>>,
    events: Mutex<Vec<EncodeEvent>>,
    failure: Mutex<Option<String>>,
    check_failure: Mutex<Option<String>>,
}

impl StubEncoder {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            events: Mutex::new(vec![
                EncodeEvent::Progress(50),
                EncodeEvent::Progress(100),
                EncodeEvent::Closed { exit_code: Some(0) },
            ]),
            failure: Mutex::new(None),
            check_failure: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<EncodeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn emit(&self, events: Vec<EncodeEvent>) {
        *self.events.lock().unwrap() = events;
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_check(&self, message: &str) {
        *self.check_failure.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl VideoEncoder for StubEncoder {
    async fn check(&self) -> LapseResult<()> {
        match self.check_failure.lock().unwrap().clone() {
            Some(message) => Err(LapseError::encode(message)),
            None => Ok(()),
        }
    }

    fn encode(&self, job: EncodeJob) -> EncodeHandle {
        let frames_on_disk = job
            .input_pattern
            .parent()
            .map(frames::count_frames)
            .unwrap_or(0);
        self.calls.lock().unwrap().push(EncodeCall {
            job: job.clone(),
            frames_on_disk,
        });

        let (tx, handle) = EncodeHandle::channel();
        for event in self.events.lock().unwrap().iter().cloned() {
            tx.event(event);
        }
        let result = match self.failure.lock().unwrap().clone() {
            Some(message) => EncodeResult::Failed {
                message,
                exit_code: Some(1),
            },
            None => {
                std::fs::write(&job.output_path, b"video").unwrap();
                EncodeResult::Completed {
                    output_path: job.output_path,
                }
            }
        };
        tx.finish(result);
        handle
    }
}

#[derive(Default)]
pub struct ScriptedSavePrompt {
    answer: Mutex<Option<PathBuf>>,
    asked: AtomicUsize,
}

impl ScriptedSavePrompt {
    pub fn answer(&self, path: Option<PathBuf>) {
        *self.answer.lock().unwrap() = path;
    }

    pub fn times_asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SavePrompt for ScriptedSavePrompt {
    async fn choose_output(&self, _suggested: &Path, _format: VideoFormat) -> Option<PathBuf> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer.lock().unwrap().clone()
    }
}

/// A controller wired to test doubles, with temp dirs for frames and output.
pub struct Fixture {
    pub controller: Arc<SessionController>,
    pub ctx: AppContext,
    pub settings: Arc<ScriptedSettings>,
    pub sources: Arc<ScriptedSources>,
    pub encoder: Arc<StubEncoder>,
    pub notifier: Arc<RecordingNotifier>,
    pub tray: Arc<RecordingTray>,
    pub save_prompt: Arc<ScriptedSavePrompt>,
    pub frames_root: TempDir,
    pub output_root: TempDir,
}

impl Fixture {
    /// One-second interval, no countdown, mp4 output.
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        let frames_root = tempfile::tempdir().unwrap();
        let output_root = tempfile::tempdir().unwrap();

        let mut settings = Settings::default();
        settings.capture.interval_secs = 1;
        settings.capture.countdown = false;
        settings.output.directory = output_root.path().to_path_buf();
        configure(&mut settings);

        let settings = Arc::new(ScriptedSettings::new(settings));
        let sources = Arc::new(ScriptedSources::new(&[1, 2]));
        let encoder = Arc::new(StubEncoder::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let tray = Arc::new(RecordingTray::default());
        let save_prompt = Arc::new(ScriptedSavePrompt::default());

        let ctx = AppContext {
            settings: settings.clone(),
            sources: sources.clone(),
            frames: FrameStore::new(frames_root.path()),
            encoder: encoder.clone(),
            notifier: notifier.clone(),
            tray: tray.clone(),
            countdown: Arc::new(TimerCountdown::new(tray.clone())),
            save_prompt: save_prompt.clone(),
        };
        let controller = Arc::new(SessionController::new(ctx.clone()));

        Self {
            controller,
            ctx,
            settings,
            sources,
            encoder,
            notifier,
            tray,
            save_prompt,
            frames_root,
            output_root,
        }
    }

    pub fn stats(&self) -> (u64, u64) {
        let stats = self.settings.inner.snapshot().unwrap().stats;
        (stats.successful_renders, stats.failed_renders)
    }

    /// Session directories currently present under the frames root.
    pub fn session_dirs(&self) -> usize {
        std::fs::read_dir(self.frames_root.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
