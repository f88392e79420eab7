use std::path::PathBuf;

use thiserror::Error;

use crate::recording::RecorderState;

/// Errors surfaced by the recording core.
#[derive(Debug, Error)]
pub enum LapseError {
    #[error("Source selection was cancelled")]
    SourceSelectionCancelled,

    #[error("Capture source {source_id} is no longer available")]
    SourceUnavailable { source_id: String },

    #[error("Failed to write frame {path:?}: {message}")]
    FrameWrite { path: PathBuf, message: String },

    #[error("Encoding failed: {message}")]
    Encode { message: String },

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: RecorderState,
    },

    #[error("Settings error: {message}")]
    Settings { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type LapseResult<T> = Result<T, LapseError>;

impl LapseError {
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings {
            message: msg.into(),
        }
    }

    pub fn frame_write(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::FrameWrite {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn invalid_state(operation: &'static str, state: RecorderState) -> Self {
        Self::InvalidState { operation, state }
    }
}
