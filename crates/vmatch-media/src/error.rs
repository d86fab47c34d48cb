//! Media error types.

use std::path::PathBuf;
use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("ffprobe not found in PATH")]
    FfprobeNotFound,

    #[error("ffmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("{tool} failed: {message}")]
    ToolFailed {
        tool: &'static str,
        message: String,
    },

    #[error("Not a valid video: {0}")]
    InvalidVideo(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MediaError {
    pub fn tool_failed(tool: &'static str, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool,
            message: message.into(),
        }
    }

    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed(message.into())
    }
}
