//! API error types and status-code mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use vmatch_encoder::EncoderError;
use vmatch_metadata::MetadataError;
use vmatch_search::SearchError;
use vmatch_storage::StorageError;
use vmatch_worker::WorkerError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not a decodable video: {0}")]
    Decode(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Resource exhausted: {0}")]
    Resource(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Resource(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Decode(_) => "decode_error",
            ApiError::Conflict(_) => "conflict",
            ApiError::Timeout(_) => "timeout",
            ApiError::Resource(_) => "resource_error",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl From<EncoderError> for ApiError {
    fn from(e: EncoderError) -> Self {
        match e {
            EncoderError::Decode(m) => ApiError::Decode(m),
            EncoderError::Resource(m) => ApiError::Resource(m),
            EncoderError::Timeout(s) => ApiError::Timeout(format!("encode after {s}s")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(m) => ApiError::NotFound(m),
            StorageError::Encoder(enc) => enc.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<MetadataError> for ApiError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::NotFound(m) => ApiError::NotFound(m),
            MetadataError::Conflict(m) => ApiError::Conflict(m),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<vmatch_index::IndexError> for ApiError {
    fn from(e: vmatch_index::IndexError) -> Self {
        match e {
            vmatch_index::IndexError::DimensionMismatch { .. } => {
                ApiError::BadRequest(e.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::Encoder(enc) => enc.into(),
            SearchError::Storage(s) => s.into(),
            SearchError::Metadata(m) => m.into(),
            SearchError::Index(i) => i.into(),
            SearchError::Media(m) => ApiError::BadRequest(m.to_string()),
            SearchError::Timeout(m) => ApiError::Timeout(m),
            SearchError::BaselineNotEstablished => {
                ApiError::BadRequest("anomaly baseline not established".to_string())
            }
            SearchError::NoValidVideos => {
                ApiError::BadRequest("no valid videos in baseline corpus".to_string())
            }
        }
    }
}

impl From<WorkerError> for ApiError {
    fn from(e: WorkerError) -> Self {
        match e {
            WorkerError::Encoder(enc) => enc.into(),
            WorkerError::Storage(s) => s.into(),
            WorkerError::Metadata(m) => m.into(),
            WorkerError::Index(i) => i.into(),
            WorkerError::Media(m) => match m {
                vmatch_media::MediaError::FileNotFound(_)
                | vmatch_media::MediaError::InvalidVideo(_) => ApiError::Decode(m.to_string()),
                other => ApiError::Internal(other.to_string()),
            },
            WorkerError::Cancelled => ApiError::BadRequest("cancelled".to_string()),
            WorkerError::JobFailed(m) => ApiError::Internal(m),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal stacks are logged, not returned, outside development.
        let detail = match &self {
            ApiError::Internal(_) => {
                tracing::error!("internal error: {self}");
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                    "An internal error occurred".to_string()
                } else {
                    self.to_string()
                }
            }
            _ => self.to_string(),
        };

        let body = ErrorResponse {
            detail,
            code: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}
