//! Error types for the GPU mode switcher

use crate::profile::ProfileId;
use thiserror::Error;

/// Result type alias for the GPU mode switcher
pub type Result<T> = std::result::Result<T, GfxSwitchError>;

/// Main error type for the GPU mode switcher
#[derive(Error, Debug)]
pub enum GfxSwitchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("DBus error: {0}")]
    DBus(#[from] zbus::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A single attempt of an external command failed.
    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Every attempt allowed by the retry policy failed.
    #[error("Command `{command}` failed after {attempts} attempts: {stderr}")]
    RetriesExhausted {
        command: String,
        attempts: u32,
        stderr: String,
    },

    #[error("Cannot switch directly from {from} to {to}, switch to Integrated first")]
    InvalidTransition { from: ProfileId, to: ProfileId },

    #[error("Unknown GPU profile: {0}")]
    UnknownProfile(String),

    #[error("GPU profile not supported by the daemon: {0}")]
    UnsupportedProfile(ProfileId),

    #[error("Controller has not synchronized with the daemon yet")]
    NotStarted,

    #[error("Pending retry was cancelled")]
    Cancelled,

    #[error("Controller has been shut down")]
    Shutdown,
}

impl GfxSwitchError {
    /// Standard error output of the failed command, when there is one.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { stderr, .. } | Self::RetriesExhausted { stderr, .. } => {
                Some(stderr.as_str())
            }
            _ => None,
        }
    }
}
