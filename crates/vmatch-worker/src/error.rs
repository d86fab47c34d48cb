//! Worker error types and retry classification.

use thiserror::Error;

use vmatch_encoder::EncoderError;
use vmatch_media::MediaError;
use vmatch_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Index error: {0}")]
    Index(#[from] vmatch_index::IndexError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] vmatch_metadata::MetadataError),

    #[error("Cancelled")]
    Cancelled,

    #[error("Job failed: {0}")]
    JobFailed(String),
}

impl WorkerError {
    pub fn job_failed(message: impl Into<String>) -> Self {
        Self::JobFailed(message.into())
    }

    /// Whether the pipeline's bounded retry may re-attempt the video.
    ///
    /// Decode and model errors are terminal; network, IO, resource and
    /// timeout failures are transient.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Encoder(e) => e.is_retryable(),
            WorkerError::Media(e) => matches!(
                e,
                MediaError::Network(_)
                    | MediaError::Io(_)
                    | MediaError::DownloadFailed(_)
                    | MediaError::ToolFailed { .. }
            ),
            WorkerError::Storage(e) => match e {
                StorageError::Io(_) => true,
                StorageError::Encoder(enc) => enc.is_retryable(),
                StorageError::NotFound(_) | StorageError::Corrupt(_) => false,
            },
            WorkerError::Index(vmatch_index::IndexError::Io(_)) => true,
            WorkerError::Index(_) => false,
            WorkerError::Metadata(e) => e.is_conflict(),
            WorkerError::Cancelled | WorkerError::JobFailed(_) => false,
        }
    }
}
