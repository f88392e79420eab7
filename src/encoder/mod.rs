mod ffmpeg;
mod output;

pub use ffmpeg::FfmpegEncoder;
pub use output::get_unique_output_path;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::config::{QualityTier, Settings};
use crate::error::LapseResult;

/// Every render is letterboxed/pillarboxed onto this canvas.
pub const CANVAS_WIDTH: u32 = 1920;
pub const CANVAS_HEIGHT: u32 = 1080;

/// One render of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeJob {
    pub input_pattern: PathBuf,
    pub output_path: PathBuf,
    pub frame_count: u64,
    pub framerate: u32,
    pub quality: QualityTier,
    pub width: u32,
    pub height: u32,
}

impl EncodeJob {
    pub fn from_settings(
        settings: &Settings,
        input_pattern: PathBuf,
        output_path: PathBuf,
        frame_count: u64,
    ) -> Self {
        Self {
            input_pattern,
            output_path,
            frame_count,
            framerate: settings.output.framerate,
            quality: settings.output.quality,
            width: settings.output.width,
            height: settings.output.height,
        }
    }

    /// Arguments passed to ffmpeg, input options first.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let framerate = self.framerate.to_string();
        let mut args: Vec<String> = [
            "-y",
            "-r",
            &framerate,
            "-f",
            "image2",
            "-start_number",
            "0",
            "-i",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(self.input_pattern.to_string_lossy().into_owned());

        let crf = self.quality.crf().to_string();
        let size = format!("{}x{}", self.width, self.height);
        let filter = format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
            w = CANVAS_WIDTH,
            h = CANVAS_HEIGHT
        );
        args.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                "slow",
                "-profile:v",
                "high",
                "-vcodec",
                "libx264",
                "-crf",
                &crf,
                "-coder",
                "1",
                "-pix_fmt",
                "yuv420p",
                "-movflags",
                "+faststart",
                "-g",
                "30",
                "-bf",
                "2",
                "-c:a",
                "aac",
                "-b:a",
                "384k",
                "-b:v",
                "1000k",
                "-r",
                &framerate,
                "-s",
                &size,
                "-vf",
                &filter,
                "-progress",
                "pipe:1",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(self.output_path.to_string_lossy().into_owned());
        args
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeEvent {
    /// Structured percent complete from the `-progress` stream.
    Progress(u32),
    /// One diagnostic line from stderr.
    RawOutput(String),
    /// The process has been reaped.
    Closed { exit_code: Option<i32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeResult {
    Completed { output_path: PathBuf },
    Failed { message: String, exit_code: Option<i32> },
}

impl EncodeResult {
    pub fn is_success(&self) -> bool {
        matches!(self, EncodeResult::Completed { .. })
    }
}

/// A running render: a progress stream plus a result that resolves exactly
/// once, after the encoder process has exited.
pub struct EncodeHandle {
    pub events: mpsc::UnboundedReceiver<EncodeEvent>,
    pub result: oneshot::Receiver<EncodeResult>,
}

impl EncodeHandle {
    pub fn channel() -> (EncodeSender, EncodeHandle) {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (result_tx, result) = oneshot::channel();
        (
            EncodeSender {
                events: event_tx,
                result: result_tx,
            },
            EncodeHandle { events, result },
        )
    }

    /// Forwards every event to `on_event` until the result arrives, then
    /// drains whatever is still queued.
    pub async fn finish(mut self, mut on_event: impl FnMut(EncodeEvent)) -> EncodeResult {
        let mut events_open = true;
        let result = loop {
            tokio::select! {
                biased;
                event = self.events.recv(), if events_open => match event {
                    Some(event) => on_event(event),
                    None => events_open = false,
                },
                result = &mut self.result => {
                    break result.unwrap_or_else(|_| EncodeResult::Failed {
                        message: "Encoder stopped without reporting a result".to_string(),
                        exit_code: None,
                    });
                }
            }
        };
        while let Ok(event) = self.events.try_recv() {
            on_event(event);
        }
        result
    }
}

/// Producer side of an `EncodeHandle`.
pub struct EncodeSender {
    events: mpsc::UnboundedSender<EncodeEvent>,
    result: oneshot::Sender<EncodeResult>,
}

impl EncodeSender {
    pub fn event(&self, event: EncodeEvent) {
        let _ = self.events.send(event);
    }

    pub fn events(&self) -> mpsc::UnboundedSender<EncodeEvent> {
        self.events.clone()
    }

    pub fn finish(self, result: EncodeResult) {
        let _ = self.result.send(result);
    }
}

/// Something that turns a frame sequence into a video.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    /// Fails when the encoder cannot run at all.
    async fn check(&self) -> LapseResult<()> {
        Ok(())
    }

    fn encode(&self, job: EncodeJob) -> EncodeHandle;
}
