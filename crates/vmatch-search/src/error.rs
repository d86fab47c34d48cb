//! Search pipeline error types.

use thiserror::Error;

pub type SearchResult<T> = Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Encoder error: {0}")]
    Encoder(#[from] vmatch_encoder::EncoderError),

    #[error("Storage error: {0}")]
    Storage(#[from] vmatch_storage::StorageError),

    #[error("Index error: {0}")]
    Index(#[from] vmatch_index::IndexError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] vmatch_metadata::MetadataError),

    #[error("Media error: {0}")]
    Media(#[from] vmatch_media::MediaError),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Anomaly baseline not established")]
    BaselineNotEstablished,

    #[error("No videos could be processed for the baseline")]
    NoValidVideos,
}
