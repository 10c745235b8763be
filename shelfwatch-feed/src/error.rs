//! Error types for shelfwatch-feed

use shelfwatch_core::CameraId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Source error: {0}")]
    Source(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("No session for camera '{0}'")]
    SessionNotFound(CameraId),

    #[error("Session for camera '{camera_id}' is not accepting commands: {reason}")]
    SessionUnavailable { camera_id: CameraId, reason: String },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] shelfwatch_core::Error),
}

impl From<shelfwatch_core::ConfigError> for FeedError {
    fn from(err: shelfwatch_core::ConfigError) -> Self {
        FeedError::Config(err.to_string())
    }
}
