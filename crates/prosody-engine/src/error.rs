//! Error types for the prosodic engine

use std::time::Duration;
use thiserror::Error;

/// Result type alias for prosody operations
pub type ProsodyResult<T> = Result<T, ProsodyError>;

/// Errors that can occur while planning, synthesizing or stitching an utterance.
///
/// `Planning` and `BackendTimeout` are recovered inside the pipeline: the
/// planner falls back to one chunk and the scheduler substitutes silence.
/// `Attribution` never reaches the audio path. Everything else ends the
/// utterance.
#[derive(Error, Debug)]
pub enum ProsodyError {
    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Backend timed out on chunk {chunk} after {elapsed:?}")]
    BackendTimeout { chunk: usize, elapsed: Duration },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Attribution sink error: {0}")]
    Attribution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProsodyError {
    /// True for failures that end the utterance early (the caller gets partial audio).
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProsodyError::Planning(_)
                | ProsodyError::BackendTimeout { .. }
                | ProsodyError::Attribution(_)
        )
    }
}

impl From<hound::Error> for ProsodyError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => ProsodyError::Io(e),
            other => ProsodyError::Audio(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for ProsodyError {
    fn from(err: reqwest::Error) -> Self {
        ProsodyError::Backend(err.to_string())
    }
}

impl From<config::ConfigError> for ProsodyError {
    fn from(err: config::ConfigError) -> Self {
        ProsodyError::Config(err.to_string())
    }
}
