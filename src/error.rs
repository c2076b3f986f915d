//! Error taxonomy shared by every engine operation

use std::path::PathBuf;
use thiserror::Error;

/// Result alias carrying [`AudioError`]
pub type Result<T> = std::result::Result<T, AudioError>;

/// Audio engine errors
///
/// Every variant is recoverable by the caller except `InvalidArgument`, which
/// signals a bug on the calling side. Nothing in here is ever produced on the
/// real-time callback thread; failures there degrade to silence instead.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio engine not initialized")]
    NotInitialized,

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid or stale sound handle")]
    InvalidHandle,

    #[error("Device error: {0}")]
    Device(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Sound pool full ({0} sounds loaded)")]
    PoolFull(usize),

    #[error("Failed to initialize audio: {0}")]
    Init(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl AudioError {
    pub(crate) fn invalid_argument<T: Into<String>>(msg: T) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

impl From<serde_json::Error> for AudioError {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value.to_string())
    }
}
