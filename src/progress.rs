//! Render progress derived from ffmpeg output.
//!
//! Two channels exist: the machine-readable `-progress pipe:1` key/value
//! stream on stdout, and the human stats line on stderr
//! (`frame=  120 fps= 60 ... time=00:00:04.00 ...`). The stderr form is only a
//! fallback and keeps the calibration the recorder has always used: the
//! timestamp is read in minutes against a duration of `frames / framerate`.
//! So `time=01:00:00.00` for 1800 frames at 30 fps is 100%, and a real
//! `time=00:00:30.00` reads as 0%. `-progress` output is in real seconds.

const STATS_TIME_KEY: &str = "time=";
const PROGRESS_TIME_KEYS: &[&str] = &["out_time_us=", "out_time_ms="];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressParser {
    expected_secs: f64,
}

impl ProgressParser {
    pub fn new(frame_count: u64, framerate: u32) -> Self {
        let expected_secs = if framerate == 0 {
            0.0
        } else {
            frame_count as f64 / framerate as f64
        };
        Self { expected_secs }
    }

    /// Percent complete from a stderr stats line, or `None` when the line
    /// carries no `time=HH:MM:SS.ms` stamp.
    pub fn parse_stats_line(&self, line: &str) -> Option<u32> {
        let start = line.find(STATS_TIME_KEY)? + STATS_TIME_KEY.len();
        let stamp = line[start..].split_whitespace().next()?;
        let elapsed_minutes = parse_timestamp(stamp)? / 60.0;
        Some(self.percent(elapsed_minutes))
    }

    /// Percent complete from one `-progress` key/value line.
    pub fn parse_progress_line(&self, line: &str) -> Option<u32> {
        let line = line.trim();
        let value = PROGRESS_TIME_KEYS
            .iter()
            .find_map(|key| line.strip_prefix(key))?;
        let micros: i64 = value.trim().parse().ok()?;
        let elapsed_secs = micros.max(0) as f64 / 1_000_000.0;
        Some(self.percent(elapsed_secs))
    }

    fn percent(&self, elapsed: f64) -> u32 {
        if self.expected_secs <= 0.0 || !elapsed.is_finite() {
            return 0;
        }
        let percent = (elapsed / self.expected_secs * 100.0).floor();
        percent.clamp(0.0, 100.0) as u32
    }
}

/// Seconds in an `HH:MM:SS(.frac)` stamp.
fn parse_timestamp(stamp: &str) -> Option<f64> {
    let mut parts = stamp.splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
