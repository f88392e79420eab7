mod capture_loop;
mod controller;
#[cfg(test)]
pub(crate) mod testing;

pub use capture_loop::CaptureLoop;
pub use controller::{AppContext, SessionController, StopOutcome};

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::frames::FrameDir;

/// Consecutive failed ticks after which capture gives up and pauses.
pub const MAX_CONSECUTIVE_TICK_FAILURES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    Idle,
    Recording,
    Paused,
    Rendering,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecorderState::Idle => "idle",
            RecorderState::Recording => "recording",
            RecorderState::Paused => "paused",
            RecorderState::Rendering => "rendering",
        };
        f.write_str(name)
    }
}

/// Why a session is paused. Only `SystemSuspended` is undone automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    UserRequested,
    SystemSuspended,
    SourceLost,
    CaptureFailing,
}

/// Inbound power and focus signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    Sleep,
    Lock,
    Suspend,
    ResignActive,
    Wake,
    Unlock,
    Resume,
    BecomeActive,
}

impl PowerEvent {
    pub fn suspends(&self) -> bool {
        matches!(
            self,
            PowerEvent::Sleep | PowerEvent::Lock | PowerEvent::Suspend | PowerEvent::ResignActive
        )
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sleep" => Some(PowerEvent::Sleep),
            "lock" => Some(PowerEvent::Lock),
            "suspend" => Some(PowerEvent::Suspend),
            "resign-active" => Some(PowerEvent::ResignActive),
            "wake" => Some(PowerEvent::Wake),
            "unlock" => Some(PowerEvent::Unlock),
            "resume" => Some(PowerEvent::Resume),
            "become-active" => Some(PowerEvent::BecomeActive),
            _ => None,
        }
    }
}

/// The one live session. Lives for the whole process and cycles through
/// states; everything but `generation` is cleared on reset.
#[derive(Debug)]
pub struct RecordingSession {
    pub(crate) state: RecorderState,
    pub(crate) pause_reason: Option<PauseReason>,
    /// `None` is the unset sentinel.
    pub(crate) source_id: Option<String>,
    /// Index of the next frame, equal to frames written so far.
    pub(crate) frame_count: u64,
    pub(crate) frame_dir: Option<FrameDir>,
    pub(crate) interval: Duration,
    /// Bumped on every start so tasks from an earlier session can tell.
    pub(crate) generation: u64,
    pub(crate) capture: Option<CaptureLoop>,
    pub(crate) countdown_cancel: Option<oneshot::Sender<()>>,
    recorded: Duration,
    running_since: Option<Instant>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self {
            state: RecorderState::Idle,
            pause_reason: None,
            source_id: None,
            frame_count: 0,
            frame_dir: None,
            interval: Duration::ZERO,
            generation: 0,
            capture: None,
            countdown_cancel: None,
            recorded: Duration::ZERO,
            running_since: None,
        }
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state == RecorderState::Recording
    }

    pub(crate) fn countdown_pending(&self) -> bool {
        self.countdown_cancel.is_some()
    }

    pub(crate) fn clock_start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub(crate) fn clock_stop(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.recorded += since.elapsed();
        }
    }

    /// Time spent actually capturing, excluding pauses and the countdown.
    pub fn elapsed(&self) -> Duration {
        self.recorded + self.running_since.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Returns the session to idle, handing back what needs tearing down.
    pub(crate) fn clear(&mut self) -> Teardown {
        self.state = RecorderState::Idle;
        self.pause_reason = None;
        self.source_id = None;
        self.frame_count = 0;
        self.recorded = Duration::ZERO;
        self.running_since = None;
        Teardown {
            frame_dir: self.frame_dir.take(),
            capture: self.capture.take(),
            countdown_cancel: self.countdown_cancel.take(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            pause_reason: self.pause_reason,
            frame_count: self.frame_count,
            source_id: self.source_id.clone(),
            frame_dir: self.frame_dir.as_ref().map(|d| d.path().to_path_buf()),
            elapsed: self.elapsed(),
            countdown_pending: self.countdown_pending(),
        }
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct Teardown {
    pub frame_dir: Option<FrameDir>,
    pub capture: Option<CaptureLoop>,
    pub countdown_cancel: Option<oneshot::Sender<()>>,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: RecorderState,
    pub pause_reason: Option<PauseReason>,
    pub frame_count: u64,
    pub source_id: Option<String>,
    pub frame_dir: Option<PathBuf>,
    pub elapsed: Duration,
    pub countdown_pending: bool,
}
