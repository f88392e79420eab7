//! Interval screen capture rendered into timelapse videos.
//!
//! A [`recording::SessionController`] drives one recording at a time: it picks
//! a capture source, snapshots it on a fixed interval into a temporary frame
//! directory, and hands the frames to ffmpeg when stopped.

pub mod capture;
pub mod config;
pub mod encoder;
pub mod error;
pub mod frames;
pub mod logging;
pub mod notify;
pub mod progress;
pub mod recording;
pub mod surface;

pub use error::{LapseError, LapseResult};
