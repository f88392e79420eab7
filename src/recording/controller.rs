use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;

use super::capture_loop::{CaptureLoop, LoopTarget};
use super::{PauseReason, PowerEvent, RecorderState, RecordingSession, SessionStatus};
use crate::capture::SourceSelector;
use crate::config::{Settings, SettingsStore};
use crate::encoder::{get_unique_output_path, EncodeEvent, EncodeJob, EncodeResult, VideoEncoder};
use crate::error::{LapseError, LapseResult};
use crate::frames::FrameStore;
use crate::notify::{open_on_click, ClickAction, Notifier};
use crate::progress::ProgressParser;
use crate::surface::{Countdown, SavePrompt, TraySurface};

/// Everything the controller talks to, built once at startup.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<dyn SettingsStore>,
    pub sources: Arc<dyn SourceSelector>,
    pub frames: FrameStore,
    pub encoder: Arc<dyn VideoEncoder>,
    pub notifier: Arc<dyn Notifier>,
    pub tray: Arc<dyn TraySurface>,
    pub countdown: Arc<dyn Countdown>,
    pub save_prompt: Arc<dyn SavePrompt>,
}

impl AppContext {
    /// Notifies unless the user turned notifications off.
    pub(crate) fn announce(&self, title: &str, body: &str, on_click: Option<ClickAction>) {
        let enabled = self
            .settings
            .snapshot()
            .map(|s| s.ui.show_notifications)
            .unwrap_or(true);
        tracing::debug!(enabled, "{title}: {body}");
        if enabled {
            self.notifier.notify(title, body, on_click);
        }
    }
}

/// How a `stop()` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Rendered(PathBuf),
    /// Frames were thrown away without encoding.
    Discarded,
    Failed(String),
    /// Nothing was recording.
    Ignored,
}

/// Owns the recording lifecycle.
///
/// Public operations are serialized by `ops`; the session itself sits behind a
/// plain mutex that is never held across an await. `start` lets go of `ops`
/// before its countdown and `stop` before rendering, so the session stays
/// controllable during both.
pub struct SessionController {
    ctx: AppContext,
    session: Arc<Mutex<RecordingSession>>,
    ops: tokio::sync::Mutex<()>,
}

impl SessionController {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            session: Arc::new(Mutex::new(RecordingSession::new())),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub(crate) fn session(&self) -> Arc<Mutex<RecordingSession>> {
        Arc::clone(&self.session)
    }

    fn lock(&self) -> MutexGuard<'_, RecordingSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> RecorderState {
        self.lock().state
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status()
    }

    /// Selects a source and begins recording, after the countdown when one is
    /// configured. The session counts as recording during the countdown.
    pub async fn start(&self) -> LapseResult<()> {
        let op = self.ops.lock().await;
        let state = self.state();
        if state != RecorderState::Idle {
            tracing::warn!(state = %state, "Ignoring start");
            return Err(LapseError::invalid_state("start", state));
        }

        let settings = self.ctx.settings.snapshot()?;
        let source_id = match self.ctx.sources.select_source().await {
            Ok(id) => id,
            Err(LapseError::SourceSelectionCancelled) => {
                tracing::info!("Source selection cancelled");
                return Err(LapseError::SourceSelectionCancelled);
            }
            Err(e) => {
                tracing::warn!("Source selection failed: {e}");
                return Err(e);
            }
        };
        let frame_dir = self.ctx.frames.allocate_session_dir()?;
        let interval = Duration::from_secs(settings.capture.interval_secs);
        let countdown_secs = settings
            .capture
            .countdown
            .then_some(settings.capture.countdown_secs);

        let (generation, countdown_cancelled) = {
            let mut s = self.lock();
            s.generation += 1;
            s.state = RecorderState::Recording;
            s.pause_reason = None;
            s.source_id = Some(source_id.clone());
            s.frame_count = 0;
            s.frame_dir = Some(frame_dir);
            s.interval = interval;
            let cancelled = match countdown_secs {
                Some(_) => {
                    let (tx, rx) = oneshot::channel();
                    s.countdown_cancel = Some(tx);
                    Some(rx)
                }
                None => {
                    self.begin_capture(&mut s);
                    None
                }
            };
            (s.generation, cancelled)
        };
        tracing::info!(
            source_id = %source_id,
            interval_secs = interval.as_secs(),
            countdown = countdown_secs.is_some(),
            "Recording started"
        );
        self.ctx.tray.show_state(RecorderState::Recording);
        drop(op);

        if let (Some(secs), Some(cancelled)) = (countdown_secs, countdown_cancelled) {
            tokio::select! {
                _ = self.ctx.countdown.run(secs) => self.finish_countdown(generation),
                _ = cancelled => tracing::debug!("Countdown cancelled"),
            }
        }
        Ok(())
    }

    fn finish_countdown(&self, generation: u64) {
        let mut s = self.lock();
        if s.generation != generation || s.countdown_cancel.take().is_none() {
            return;
        }
        match s.state {
            RecorderState::Recording => {
                tracing::debug!("Countdown finished");
                self.begin_capture(&mut s);
            }
            RecorderState::Paused => tracing::debug!("Countdown finished while paused"),
            _ => {}
        }
    }

    fn begin_capture(&self, s: &mut RecordingSession) {
        let (Some(source_id), Some(frame_dir)) = (
            s.source_id.clone(),
            s.frame_dir.as_ref().map(|d| d.path().to_path_buf()),
        ) else {
            tracing::warn!("No source or frame directory, capture not started");
            return;
        };
        s.clock_start();
        s.capture = Some(CaptureLoop::begin(
            self.ctx.clone(),
            self.session(),
            LoopTarget {
                generation: s.generation,
                source_id,
                frame_dir,
                interval: s.interval,
            },
        ));
    }

    /// Returns `false` (and changes nothing) unless recording.
    pub async fn pause(&self) -> bool {
        self.pause_for(PauseReason::UserRequested).await
    }

    async fn pause_for(&self, reason: PauseReason) -> bool {
        let _op = self.ops.lock().await;
        let capture = {
            let mut s = self.lock();
            if s.state != RecorderState::Recording {
                tracing::warn!(state = %s.state, reason = ?reason, "Ignoring pause");
                return false;
            }
            s.state = RecorderState::Paused;
            s.pause_reason = Some(reason);
            s.clock_stop();
            s.capture.take()
        };
        if let Some(mut capture) = capture {
            capture.end().await;
        }
        tracing::info!(reason = ?reason, "Recording paused");
        self.ctx.tray.show_state(RecorderState::Paused);
        true
    }

    /// Returns `false` (and changes nothing) unless paused.
    pub async fn resume(&self) -> bool {
        self.resume_if(|_| true).await
    }

    async fn resume_if(&self, allowed: impl Fn(Option<PauseReason>) -> bool) -> bool {
        let _op = self.ops.lock().await;
        {
            let mut s = self.lock();
            if s.state != RecorderState::Paused {
                tracing::warn!(state = %s.state, "Ignoring resume");
                return false;
            }
            if !allowed(s.pause_reason) {
                tracing::info!(reason = ?s.pause_reason, "Leaving pause in place");
                return false;
            }
            s.state = RecorderState::Recording;
            s.pause_reason = None;
            // A pause during the countdown leaves capture to finish_countdown.
            if !s.countdown_pending() {
                self.begin_capture(&mut s);
            }
        }
        tracing::info!("Recording resumed");
        self.ctx.tray.show_state(RecorderState::Recording);
        true
    }

    /// Ends capture and renders what was recorded. Resolves once the encoder
    /// has exited and the session is back to idle.
    pub async fn stop(&self) -> LapseResult<StopOutcome> {
        let op = self.ops.lock().await;
        let (capture, countdown) = {
            let mut s = self.lock();
            if !matches!(s.state, RecorderState::Recording | RecorderState::Paused) {
                tracing::warn!(state = %s.state, "Ignoring stop");
                return Ok(StopOutcome::Ignored);
            }
            s.state = RecorderState::Rendering;
            s.pause_reason = None;
            s.clock_stop();
            (s.capture.take(), s.countdown_cancel.take())
        };
        if let Some(mut capture) = capture {
            capture.end().await;
        }
        if let Some(cancel) = countdown {
            let _ = cancel.send(());
            tracing::info!("Stopped during countdown, nothing to render");
            self.reset_session();
            return Ok(StopOutcome::Discarded);
        }
        self.ctx.tray.show_state(RecorderState::Rendering);
        drop(op);

        let outcome = self.render().await;
        self.reset_session();
        outcome
    }

    async fn render(&self) -> LapseResult<StopOutcome> {
        let settings = self.ctx.settings.snapshot()?;
        let (frame_count, pattern) = {
            let s = self.lock();
            (s.frame_count, s.frame_dir.as_ref().map(|d| d.pattern()))
        };
        let Some(pattern) = pattern else {
            return Ok(StopOutcome::Discarded);
        };
        if frame_count == 0 {
            tracing::info!("No frames captured, skipping render");
            self.ctx.announce(
                "Nothing to render",
                "No frames were captured before the recording stopped.",
                None,
            );
            return Ok(StopOutcome::Discarded);
        }

        let output_path = match self.output_path(&settings).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                tracing::info!("Save cancelled, discarding frames");
                return Ok(StopOutcome::Discarded);
            }
            Err(message) => {
                return self.finish_render(EncodeResult::Failed {
                    message,
                    exit_code: None,
                });
            }
        };

        if let Err(e) = self.ctx.encoder.check().await {
            return self.finish_render(EncodeResult::Failed {
                message: e.to_string(),
                exit_code: None,
            });
        }

        let job = EncodeJob::from_settings(&settings, pattern, output_path, frame_count);
        tracing::info!(output = ?job.output_path, frames = frame_count, "Rendering");
        let parser = ProgressParser::new(frame_count, job.framerate);
        let tray = Arc::clone(&self.ctx.tray);
        let mut structured = false;
        let result = self
            .ctx
            .encoder
            .encode(job)
            .finish(|event| match event {
                EncodeEvent::Progress(percent) => {
                    structured = true;
                    tray.set_title(&format!("{percent}%"));
                }
                EncodeEvent::RawOutput(line) => {
                    if structured {
                        return;
                    }
                    if let Some(percent) = parser.parse_stats_line(&line) {
                        tray.set_title(&format!("{percent}%"));
                    }
                }
                EncodeEvent::Closed { exit_code } => {
                    tracing::debug!(exit_code = ?exit_code, "Encoder exited");
                }
            })
            .await;

        self.finish_render(result)
    }

    /// `Ok(None)` when the user dismissed the save prompt.
    async fn output_path(&self, settings: &Settings) -> Result<Option<PathBuf>, String> {
        let suggested = settings.output_path();
        if settings.output.ask_save_path {
            return Ok(self
                .ctx
                .save_prompt
                .choose_output(&suggested, settings.output.format)
                .await);
        }
        settings
            .ensure_output_dir()
            .map_err(|e| format!("Output directory unavailable: {e}"))?;
        Ok(Some(get_unique_output_path(&suggested)))
    }

    /// Counts and announces the result. The user is told about the video even
    /// when the counters cannot be saved; the store error is still returned.
    fn finish_render(&self, result: EncodeResult) -> LapseResult<StopOutcome> {
        let recorded = self.ctx.settings.record_render(result.is_success());
        let outcome = match result {
            EncodeResult::Completed { output_path } => {
                self.ctx.announce(
                    "Timelapse ready",
                    "Complete! Click to open the video.",
                    Some(open_on_click(&output_path)),
                );
                StopOutcome::Rendered(output_path)
            }
            EncodeResult::Failed { message, .. } => {
                tracing::error!("Render failed: {message}");
                self.ctx
                    .announce("Rendering failed", &format!("An error occurred: {message}"), None);
                StopOutcome::Failed(message)
            }
        };
        if let Err(e) = recorded {
            tracing::error!("Failed to record render result: {e}");
            return Err(e);
        }
        Ok(outcome)
    }

    /// Discards the recording without rendering. Works mid-countdown too.
    pub async fn cancel(&self) -> bool {
        let _op = self.ops.lock().await;
        let (capture, countdown) = {
            let mut s = self.lock();
            if !matches!(s.state, RecorderState::Recording | RecorderState::Paused) {
                tracing::warn!(state = %s.state, "Ignoring cancel");
                return false;
            }
            (s.capture.take(), s.countdown_cancel.take())
        };
        if let Some(cancel) = countdown {
            let _ = cancel.send(());
        }
        if let Some(mut capture) = capture {
            capture.end().await;
        }
        self.reset_session();
        tracing::info!("Recording cancelled, frames discarded");
        true
    }

    /// Throws the current recording away and starts over with a fresh
    /// source selection.
    pub async fn retake(&self) -> LapseResult<()> {
        if !self.cancel().await {
            return Err(LapseError::invalid_state("retake", self.state()));
        }
        tracing::info!("Retaking recording");
        self.start().await
    }

    /// Back to idle from anywhere but rendering, deleting captured frames.
    pub async fn reset(&self) -> bool {
        let _op = self.ops.lock().await;
        let capture = {
            let mut s = self.lock();
            if s.state == RecorderState::Rendering {
                tracing::warn!("Ignoring reset while rendering");
                return false;
            }
            s.capture.take()
        };
        if let Some(mut capture) = capture {
            capture.end().await;
        }
        self.reset_session();
        true
    }

    fn reset_session(&self) {
        let teardown = self.lock().clear();
        if let Some(cancel) = teardown.countdown_cancel {
            let _ = cancel.send(());
        }
        drop(teardown.capture);
        if let Some(dir) = teardown.frame_dir {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.cleanup() {
                tracing::warn!(path = ?path, "Failed to remove frame directory: {e}");
            }
        }
        self.ctx.tray.set_title("");
        self.ctx.tray.show_state(RecorderState::Idle);
    }

    /// Suspend-type events pause a running recording; wake-type events only
    /// undo a pause that a suspend caused.
    pub async fn on_power_event(&self, event: PowerEvent) -> bool {
        tracing::debug!(event = ?event, "Power event");
        if event.suspends() {
            if self.state() != RecorderState::Recording {
                return false;
            }
            return self.pause_for(PauseReason::SystemSuspended).await;
        }
        if self.status().pause_reason != Some(PauseReason::SystemSuspended) {
            return false;
        }
        self.resume_if(|reason| reason == Some(PauseReason::SystemSuspended))
            .await
    }
}
