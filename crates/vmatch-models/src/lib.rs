//! Shared data models for the VMatch backend.
//!
//! This crate provides Serde-serializable types for:
//! - Video records and indexing state transitions
//! - Indexing jobs and batch submissions
//! - Search requests, results and click feedback
//! - Encoder output (global vector + temporal matrix)
//! - Anomaly baseline statistics and reports

pub mod anomaly;
pub mod encoding;
pub mod ingest;
pub mod job;
pub mod search;
pub mod video;

// Re-export common types
pub use anomaly::{AnomalyReport, AnomalyWindow, BaselineStats};
pub use encoding::{
    cosine_similarity, l2_norm, VideoEncoding, DEFAULT_NUM_FRAMES, DEFAULT_VECTOR_DIM,
};
pub use ingest::{IndexRequest, IndexStatus, IndexingOptions, VideoSubmission};
pub use job::{IndexingJob, JobId, JobStatus};
pub use search::{
    QueryClick, QueryId, SearchFilters, SearchOptions, SearchRequest, SearchResponse, SearchResult,
    CANDIDATE_TOP_K, RESULT_TOP_K,
};
pub use video::{VideoId, VideoRecord, VideoStatus};
