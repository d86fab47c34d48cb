//! Query path: encode-or-cache, candidate retrieval, temporal re-ranking
//! and anomaly detection.

pub mod anomaly;
pub mod error;
pub mod rerank;
pub mod service;

pub use anomaly::AnomalyDetector;
pub use error::{SearchError, SearchResult as SearchPipelineResult};
pub use rerank::{banded_dtw, temporal_similarity, TemporalScores, DTW_RADIUS};
pub use service::{SearchConfig, SearchService};
