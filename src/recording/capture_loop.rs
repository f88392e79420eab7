use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::controller::AppContext;
use super::{PauseReason, RecorderState, RecordingSession, MAX_CONSECUTIVE_TICK_FAILURES};
use crate::capture::SourceSelector;
use crate::error::LapseError;
use crate::frames;

/// Handle to a running capture task.
///
/// The task only looks at its stop signal between ticks, so a tick that has
/// started always finishes (frame written and counted) before `end` returns.
#[derive(Debug)]
pub struct CaptureLoop {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

pub(crate) struct LoopTarget {
    pub generation: u64,
    pub source_id: String,
    pub frame_dir: PathBuf,
    pub interval: Duration,
}

enum TickOutcome {
    Written(PathBuf),
    SourceLost(LapseError),
    Failed(String),
}

impl CaptureLoop {
    /// Spawns the polling task. The first frame is taken one interval after
    /// the call.
    pub(crate) fn begin(
        ctx: AppContext,
        session: Arc<Mutex<RecordingSession>>,
        target: LoopTarget,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        tracing::debug!(
            source_id = %target.source_id,
            interval_secs = target.interval.as_secs(),
            "Capture loop starting"
        );
        let task = tokio::spawn(run(ctx, session, target, stop_rx));
        Self {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Stops the loop and waits for it to exit. Safe to call repeatedly.
    pub async fn end(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!("Capture loop panicked");
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

async fn run(
    ctx: AppContext,
    session: Arc<Mutex<RecordingSession>>,
    target: LoopTarget,
    mut stop: oneshot::Receiver<()>,
) {
    let period = target.interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }

        let index = {
            let s = session.lock().unwrap_or_else(|e| e.into_inner());
            if !s.is_current(target.generation) {
                break;
            }
            s.frame_count
        };

        match capture_frame(
            ctx.sources.clone(),
            target.source_id.clone(),
            target.frame_dir.clone(),
            index,
        )
        .await
        {
            TickOutcome::Written(path) => {
                failures = 0;
                let mut s = session.lock().unwrap_or_else(|e| e.into_inner());
                if s.generation == target.generation && s.state != RecorderState::Idle {
                    s.frame_count = index + 1;
                }
                tracing::debug!(frame = index, path = ?path, "Captured frame");
            }
            TickOutcome::SourceLost(err) => {
                tracing::warn!(source_id = %target.source_id, "{err}");
                halt(&ctx, &session, target.generation, PauseReason::SourceLost, &err.to_string());
                break;
            }
            TickOutcome::Failed(message) => {
                failures += 1;
                tracing::warn!(frame = index, failures, "Skipped frame: {message}");
                if failures >= MAX_CONSECUTIVE_TICK_FAILURES {
                    halt(&ctx, &session, target.generation, PauseReason::CaptureFailing, &message);
                    break;
                }
            }
        }
    }

    tracing::debug!(source_id = %target.source_id, "Capture loop exited");
}

/// One tick: find the source, take a still, write it. Runs on the blocking
/// pool since every step blocks.
async fn capture_frame(
    sources: Arc<dyn SourceSelector>,
    source_id: String,
    frame_dir: PathBuf,
    index: u64,
) -> TickOutcome {
    let result = tokio::task::spawn_blocking(move || {
        let listed = match sources.list_sources() {
            Ok(listed) => listed,
            Err(e) => return TickOutcome::Failed(format!("Failed to list sources: {e}")),
        };
        let Some(source) = listed.into_iter().find(|s| s.id == source_id) else {
            return TickOutcome::SourceLost(LapseError::SourceUnavailable { source_id });
        };
        let image = match sources.snapshot(&source) {
            Ok(image) => image,
            Err(e) => return TickOutcome::Failed(format!("Snapshot failed: {e}")),
        };
        match frames::write_frame(&frame_dir, index, &image) {
            Ok(path) => TickOutcome::Written(path),
            Err(e) => TickOutcome::Failed(e.to_string()),
        }
    })
    .await;

    result.unwrap_or_else(|e| TickOutcome::Failed(format!("Capture task failed: {e}")))
}

/// Moves a still-current session to Paused on the loop's own initiative.
fn halt(
    ctx: &AppContext,
    session: &Arc<Mutex<RecordingSession>>,
    generation: u64,
    reason: PauseReason,
    cause: &str,
) {
    let halted = {
        let mut s = session.lock().unwrap_or_else(|e| e.into_inner());
        if s.is_current(generation) {
            s.state = RecorderState::Paused;
            s.pause_reason = Some(reason);
            s.clock_stop();
            // Our own handle; dropping it only detaches this task.
            s.capture.take();
            true
        } else {
            false
        }
    };
    if !halted {
        return;
    }

    tracing::info!(reason = ?reason, "Recording paused");
    ctx.tray.show_state(RecorderState::Paused);
    let body = match reason {
        PauseReason::SourceLost => {
            format!("{cause}. Resume or stop to save what was captured.")
        }
        _ => format!(
            "Frames could not be captured ({cause}). Check disk space and screen recording permission."
        ),
    };
    ctx.announce("Recording paused", &body, None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::testing::Fixture;

    fn begin(fixture: &Fixture, source_id: &str) -> CaptureLoop {
        let shared = fixture.controller.session();
        let (generation, frame_dir) = {
            let mut s = shared.lock().unwrap();
            let dir = fixture.ctx.frames.allocate_session_dir().unwrap();
            let path = dir.path().to_path_buf();
            s.generation += 1;
            s.state = RecorderState::Recording;
            s.source_id = Some(source_id.to_string());
            s.frame_dir = Some(dir);
            (s.generation, path)
        };
        CaptureLoop::begin(
            fixture.ctx.clone(),
            shared,
            LoopTarget {
                generation,
                source_id: source_id.to_string(),
                frame_dir,
                interval: Duration::from_secs(1),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_frame_per_tick_after_first_interval() {
        let fixture = Fixture::new();
        let mut capture = begin(&fixture, "screen:1");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fixture.controller.status().frame_count, 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fixture.controller.status().frame_count, 2);

        capture.end().await;
        assert!(!capture.is_running());
        let dir = fixture.controller.status().frame_dir.unwrap();
        assert_eq!(frames::count_frames(&dir), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_is_idempotent_and_stops_writes() {
        let fixture = Fixture::new();
        let mut capture = begin(&fixture, "screen:1");
        tokio::time::sleep(Duration::from_millis(1500)).await;

        capture.end().await;
        capture.end().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fixture.controller.status().frame_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_source_pauses_before_next_tick() {
        let fixture = Fixture::new();
        let mut capture = begin(&fixture, "screen:1");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fixture.controller.status().frame_count, 1);

        fixture.sources.remove("screen:1");
        tokio::time::sleep(Duration::from_secs(1)).await;

        let status = fixture.controller.status();
        assert_eq!(status.state, RecorderState::Paused);
        assert_eq!(status.pause_reason, Some(PauseReason::SourceLost));
        assert!(!capture.is_running());

        fixture.sources.restore("screen:1");
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fixture.controller.status().frame_count, 1);
        let sent = fixture.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "Recording paused");
        assert!(sent[0]
            .body
            .starts_with("Capture source screen:1 is no longer available."));
        assert_eq!(fixture.tray.last_state(), Some(RecorderState::Paused));
        capture.end().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_failed_tick_is_skipped() {
        let fixture = Fixture::new();
        let mut capture = begin(&fixture, "screen:1");
        fixture.sources.fail_snapshots(1);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let status = fixture.controller.status();
        assert_eq!(status.state, RecorderState::Recording);
        assert_eq!(status.frame_count, 2);
        capture.end().await;

        let dir = status.frame_dir.unwrap();
        assert!(frames::frame_path(&dir, 0).exists());
        assert!(frames::frame_path(&dir, 1).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_escalate_to_pause() {
        let fixture = Fixture::new();
        let mut capture = begin(&fixture, "screen:1");
        fixture.sources.fail_snapshots(u32::MAX);

        tokio::time::sleep(Duration::from_millis(
            MAX_CONSECUTIVE_TICK_FAILURES as u64 * 1000 + 500,
        ))
        .await;
        let status = fixture.controller.status();
        assert_eq!(status.state, RecorderState::Paused);
        assert_eq!(status.pause_reason, Some(PauseReason::CaptureFailing));
        assert_eq!(status.frame_count, 0);
        assert!(!capture.is_running());
        capture.end().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_exits_when_session_moves_on() {
        let fixture = Fixture::new();
        let mut capture = begin(&fixture, "screen:1");
        {
            let shared = fixture.controller.session();
            let mut s = shared.lock().unwrap();
            s.state = RecorderState::Paused;
        }
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!capture.is_running());
        assert_eq!(fixture.controller.status().frame_count, 0);
        capture.end().await;
    }
}
