//! Search request/response models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::VideoId;

/// Candidate fan-out: how many items the vector index returns before
/// re-ranking.
pub const CANDIDATE_TOP_K: usize = 50;

/// Default number of results returned to the caller.
pub const RESULT_TOP_K: usize = 20;

/// Unique identifier for a logged search query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct QueryId(pub String);

impl QueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attribute filters pushed below top-k in the vector index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchFilters {
    /// Minimum duration in seconds (inclusive)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_min: Option<f64>,
    /// Maximum duration in seconds (inclusive)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_max: Option<f64>,
    /// Tag-set intersection: a candidate matches when it carries at
    /// least one of these tags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.duration_min.is_none()
            && self.duration_max.is_none()
            && self.tags.as_ref().map_or(true, |t| t.is_empty())
    }
}

/// Search options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SearchOptions {
    /// Enable temporal re-ranking of the candidate set
    #[serde(default)]
    pub enable_reranking: bool,
}

/// Search request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchRequest {
    /// Query video URI (local path or URL)
    pub query_video_url: String,
    /// Number of results to return
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<SearchFilters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<SearchOptions>,
}

fn default_top_k() -> usize {
    RESULT_TOP_K
}

impl SearchRequest {
    pub fn new(query_video_url: impl Into<String>) -> Self {
        Self {
            query_video_url: query_video_url.into(),
            top_k: RESULT_TOP_K,
            filters: None,
            options: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_reranking(mut self, enable: bool) -> Self {
        self.options = Some(SearchOptions {
            enable_reranking: enable,
        });
        self
    }

    pub fn reranking_enabled(&self) -> bool {
        self.options.as_ref().map_or(false, |o| o.enable_reranking)
    }
}

/// A single scored search result.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchResult {
    pub video_id: VideoId,
    /// Similarity in [0, 1]; identity scores 1.0
    pub similarity_score: f32,
    /// Cosine distance in [0, 2]
    pub distance: f32,
    pub video_path: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Search response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchResponse {
    pub query_id: QueryId,
    pub processing_time_ms: f64,
    pub results: Vec<SearchResult>,
    pub total_results: usize,
}

/// Click feedback on a search result (append-only log).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryClick {
    pub query_id: QueryId,
    pub video_id: VideoId,
    pub rank: u32,
    pub similarity_score: f32,
    #[serde(default = "Utc::now")]
    pub clicked_at: DateTime<Utc>,
}
