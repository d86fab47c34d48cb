//! Encoder error types.

use thiserror::Error;

pub type EncoderResult<T> = Result<T, EncoderError>;

#[derive(Debug, Error)]
pub enum EncoderError {
    /// The input is not a parseable video. Terminal for the caller.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Insufficient memory/GPU on the encoder side. Retryable.
    #[error("Resource error: {0}")]
    Resource(String),

    /// The encoder itself failed. Terminal for the caller.
    #[error("Model error: {0}")]
    Model(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The encoder returned output violating the contract
    /// (wrong shape, unnormalized global vector).
    #[error("Invalid encoder output: {0}")]
    InvalidOutput(String),
}

impl EncoderError {
    /// Whether the caller's retry policy may re-attempt this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EncoderError::Resource(_)
                | EncoderError::Timeout(_)
                | EncoderError::Network(_)
                | EncoderError::Io(_)
        )
    }
}
