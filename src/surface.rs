//! Outward-facing collaborators of the session controller: the tray
//! indicator, the countdown pre-roll and the save-path prompt.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::VideoFormat;
use crate::recording::RecorderState;

/// Presents the recorder's state. It never drives it.
pub trait TraySurface: Send + Sync {
    fn show_state(&self, state: RecorderState);
    /// Short text next to the indicator (countdown digits, render percent).
    /// Empty clears it.
    fn set_title(&self, title: &str);
}

/// Prints state changes to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleTray {
    last_title: Mutex<String>,
}

impl ConsoleTray {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TraySurface for ConsoleTray {
    fn show_state(&self, state: RecorderState) {
        let icon = match state {
            RecorderState::Idle => "○",
            RecorderState::Recording => "●",
            RecorderState::Paused => "‖",
            RecorderState::Rendering => "◌",
        };
        eprintln!("{icon} {state}");
    }

    fn set_title(&self, title: &str) {
        let mut last = self.last_title.lock().unwrap_or_else(|e| e.into_inner());
        if *last == title {
            return;
        }
        *last = title.to_string();
        if !title.is_empty() {
            eprintln!("  {title}");
        }
    }
}

/// The pre-roll between `start()` and the first capture tick. Cancellation is
/// handled by dropping the future.
#[async_trait]
pub trait Countdown: Send + Sync {
    async fn run(&self, seconds: u32);
}

/// Counts down once per second in the tray title.
pub struct TimerCountdown {
    tray: Arc<dyn TraySurface>,
}

impl TimerCountdown {
    pub fn new(tray: Arc<dyn TraySurface>) -> Self {
        Self { tray }
    }
}

#[async_trait]
impl Countdown for TimerCountdown {
    async fn run(&self, seconds: u32) {
        for remaining in (1..=seconds).rev() {
            self.tray.set_title(&remaining.to_string());
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        self.tray.set_title("");
    }
}

/// Asks the user where to write the rendered video.
#[async_trait]
pub trait SavePrompt: Send + Sync {
    /// `None` when the user dismissed the prompt.
    async fn choose_output(&self, suggested: &Path, format: VideoFormat) -> Option<PathBuf>;
}

/// Native save dialog through rfd.
#[derive(Debug, Default, Clone, Copy)]
pub struct DialogSavePrompt;

#[async_trait]
impl SavePrompt for DialogSavePrompt {
    async fn choose_output(&self, suggested: &Path, format: VideoFormat) -> Option<PathBuf> {
        let ext = format.extension();
        let mut dialog = rfd::AsyncFileDialog::new()
            .set_title("Save timelapse")
            .add_filter(format.display_name(), &[ext]);
        if let Some(dir) = suggested.parent() {
            dialog = dialog.set_directory(dir);
        }
        if let Some(name) = suggested.file_name() {
            dialog = dialog.set_file_name(name.to_string_lossy());
        }
        let path = dialog.save_file().await.map(|h| h.path().to_path_buf())?;
        if path.extension().is_none() {
            return Some(path.with_extension(ext));
        }
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Titles(Mutex<Vec<String>>);

    impl TraySurface for Titles {
        fn show_state(&self, _state: RecorderState) {}
        fn set_title(&self, title: &str) {
            self.0.lock().unwrap().push(title.to_string());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_ticks_each_second_then_clears() {
        let titles = Arc::new(Titles::default());
        let countdown = TimerCountdown::new(titles.clone());

        let started = tokio::time::Instant::now();
        countdown.run(3).await;

        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(*titles.0.lock().unwrap(), vec!["3", "2", "1", ""]);
    }

    #[test]
    fn test_console_tray_skips_repeated_titles() {
        let tray = ConsoleTray::new();
        tray.set_title("50%");
        tray.set_title("50%");
        assert_eq!(*tray.last_title.lock().unwrap(), "50%");
    }
}
