use std::path::PathBuf;

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote service error: {0}")]
    Remote(String),

    #[error("Volume layout error: {0}")]
    Layout(String),

    #[error("Device error [{device}]: {reason}")]
    Device { device: String, reason: String },

    #[error("Mount error [{}]: {reason}", .target.display())]
    Mount { target: PathBuf, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn device(device: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Device {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    pub fn mount(target: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Mount {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;
