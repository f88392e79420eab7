use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc::UnboundedSender;

use super::{EncodeEvent, EncodeHandle, EncodeJob, EncodeResult, EncodeSender, VideoEncoder};
use crate::config::Settings;
use crate::error::{LapseError, LapseResult};
use crate::progress::ProgressParser;

const MAX_STDERR_HINTS: usize = 16;
const HINTS_IN_MESSAGE: usize = 3;

/// Renders frame sequences by running an external ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.encoder.ffmpeg_path.clone())
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }

    /// Runs `ffmpeg -version` and returns its banner line.
    pub async fn version(&self) -> LapseResult<String> {
        let output = Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                LapseError::encode(format!(
                    "ffmpeg not available at {}: {e}",
                    self.ffmpeg_path.display()
                ))
            })?;

        if !output.status.success() {
            return Err(LapseError::encode(format!(
                "ffmpeg -version exited with {}",
                output.status
            )));
        }

        let banner = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("ffmpeg")
            .trim()
            .to_string();
        Ok(banner)
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn check(&self) -> LapseResult<()> {
        let banner = self.version().await?;
        tracing::debug!(ffmpeg = ?self.ffmpeg_path, "{banner}");
        Ok(())
    }

    fn encode(&self, job: EncodeJob) -> EncodeHandle {
        let (tx, handle) = EncodeHandle::channel();
        let ffmpeg_path = self.ffmpeg_path.clone();
        tokio::spawn(async move {
            let result = run(&ffmpeg_path, &job, &tx).await;
            match &result {
                EncodeResult::Completed { output_path } => {
                    tracing::info!(output = ?output_path, "Render finished");
                }
                EncodeResult::Failed { message, exit_code } => {
                    tracing::error!(exit_code = ?exit_code, "Render failed: {message}");
                }
            }
            tx.finish(result);
        });
        handle
    }
}

async fn run(ffmpeg_path: &Path, job: &EncodeJob, tx: &EncodeSender) -> EncodeResult {
    let args = job.ffmpeg_args();
    tracing::info!(
        ffmpeg = ?ffmpeg_path,
        output = ?job.output_path,
        frames = job.frame_count,
        "Starting render"
    );
    tracing::debug!(args = ?args, "ffmpeg arguments");

    let mut child = match Command::new(ffmpeg_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return EncodeResult::Failed {
                message: format!("Failed to start ffmpeg ({}): {e}", ffmpeg_path.display()),
                exit_code: None,
            };
        }
    };

    let parser = ProgressParser::new(job.frame_count, job.framerate);
    let stdout_task = child
        .stdout
        .take()
        .map(|stdout| tokio::spawn(read_progress(stdout, parser, tx.events())));
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(read_diagnostics(stderr, tx.events())));

    let status = child.wait().await;

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    let hints = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };

    let status = match status {
        Ok(status) => status,
        Err(e) => {
            return EncodeResult::Failed {
                message: format!("Failed waiting for ffmpeg: {e}"),
                exit_code: None,
            };
        }
    };

    let exit_code = status.code();
    tx.event(EncodeEvent::Closed { exit_code });

    if !status.success() {
        return EncodeResult::Failed {
            message: failure_message(exit_code, &hints),
            exit_code,
        };
    }
    if !job.output_path.exists() {
        return EncodeResult::Failed {
            message: "ffmpeg exited cleanly but wrote no output".to_string(),
            exit_code,
        };
    }
    EncodeResult::Completed {
        output_path: job.output_path.clone(),
    }
}

/// Reads the `-progress pipe:1` key/value stream.
async fn read_progress(
    stdout: ChildStdout,
    parser: ProgressParser,
    events: UnboundedSender<EncodeEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut last = None;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let percent = if line.trim() == "progress=end" {
                    Some(100)
                } else {
                    parser.parse_progress_line(&line)
                };
                if let Some(percent) = percent {
                    if last != Some(percent) {
                        last = Some(percent);
                        let _ = events.send(EncodeEvent::Progress(percent));
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read ffmpeg progress: {e}");
                break;
            }
        }
    }
}

/// Forwards stderr line by line and keeps the last few non-stats lines for
/// the failure message. Stats lines are terminated by `\r`, not `\n`.
async fn read_diagnostics(stderr: ChildStderr, events: UnboundedSender<EncodeEvent>) -> Vec<String> {
    let mut hints: VecDeque<String> = VecDeque::with_capacity(MAX_STDERR_HINTS);
    let mut segments = BufReader::new(stderr).split(b'\r');
    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let text = String::from_utf8_lossy(&bytes);
                for line in text.split('\n') {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if is_stats_line(line) {
                        tracing::trace!("ffmpeg: {line}");
                    } else {
                        tracing::debug!("ffmpeg: {line}");
                        if hints.len() == MAX_STDERR_HINTS {
                            hints.pop_front();
                        }
                        hints.push_back(line.to_string());
                    }
                    let _ = events.send(EncodeEvent::RawOutput(line.to_string()));
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read ffmpeg stderr: {e}");
                break;
            }
        }
    }
    hints.into_iter().collect()
}

fn is_stats_line(line: &str) -> bool {
    line.starts_with("frame=") || (line.contains("time=") && line.contains("speed="))
}

fn failure_message(exit_code: Option<i32>, hints: &[String]) -> String {
    let status = match exit_code {
        Some(code) => format!("ffmpeg exited with code {code}"),
        None => "ffmpeg was terminated by a signal".to_string(),
    };
    if hints.is_empty() {
        return status;
    }
    let tail = &hints[hints.len().saturating_sub(HINTS_IN_MESSAGE)..];
    format!("{status}: {}", tail.join("; "))
}
