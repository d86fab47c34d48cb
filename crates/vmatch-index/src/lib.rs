//! Vector index over global video embeddings.
//!
//! Provides a trait-based interface with two backends: an in-memory map
//! for tests and small corpora, and a SQLite-backed store for persistent
//! deployments. Both run an exact inner-product scan over unit vectors,
//! which is cosine similarity; filters are applied below top-k so a
//! filtered search still returns up to `top_k` matching entries.

mod error;
mod memory;
mod sqlite;

pub use error::{IndexError, IndexResult};
pub use memory::MemoryVectorIndex;
pub use sqlite::SqliteVectorIndex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vmatch_models::{SearchFilters, VideoId};

/// Attributes stored alongside each vector, reachable for filter
/// predicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorAttrs {
    pub video_path: String,
    pub duration: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl VectorAttrs {
    pub fn new(video_path: impl Into<String>) -> Self {
        Self {
            video_path: video_path.into(),
            duration: None,
            created_at: Utc::now(),
            tags: Vec::new(),
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Whether this entry passes the given filters.
    pub fn matches(&self, filters: &SearchFilters) -> bool {
        if let Some(min) = filters.duration_min {
            if self.duration.map_or(true, |d| d < min) {
                return false;
            }
        }
        if let Some(max) = filters.duration_max {
            if self.duration.map_or(true, |d| d > max) {
                return false;
            }
        }
        if let Some(ref wanted) = filters.tags {
            if !wanted.is_empty() && !wanted.iter().any(|t| self.tags.contains(t)) {
                return false;
            }
        }
        true
    }
}

/// A scored index hit.
#[derive(Debug, Clone)]
pub struct ScoredHit {
    pub video_id: VideoId,
    /// `(1 + cosine) / 2`, clipped to [0, 1]
    pub similarity_score: f32,
    /// `1 - cosine`, in [0, 2]
    pub distance: f32,
    pub attrs: VectorAttrs,
}

/// Vector index contract.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the entry for `video_id`.
    async fn insert(
        &self,
        video_id: &VideoId,
        vector: &[f32],
        attrs: VectorAttrs,
    ) -> IndexResult<()>;

    /// Remove an entry; returns whether it existed.
    async fn delete(&self, video_id: &VideoId) -> IndexResult<bool>;

    /// Whether an entry exists.
    async fn contains(&self, video_id: &VideoId) -> IndexResult<bool>;

    /// Top-k most similar entries, descending similarity, ties broken by
    /// video id.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> IndexResult<Vec<ScoredHit>>;

    /// All entry ids (used by the garbage collector).
    async fn list_ids(&self) -> IndexResult<Vec<VideoId>>;

    /// Number of entries.
    async fn count(&self) -> IndexResult<usize>;

    /// Remove every entry.
    async fn clear(&self) -> IndexResult<()>;
}

/// Inner product; exact cosine on unit vectors.
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Map a cosine to the reported [0, 1] similarity.
pub(crate) fn cosine_to_score(cosine: f32) -> f32 {
    ((1.0 + cosine) / 2.0).clamp(0.0, 1.0)
}

/// Sort hits by descending similarity with a deterministic id tie-break,
/// then truncate to `top_k`.
pub(crate) fn rank_hits(mut hits: Vec<ScoredHit>, top_k: usize) -> Vec<ScoredHit> {
    hits.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.video_id.cmp(&b.video_id))
    });
    hits.truncate(top_k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_mapping() {
        assert!((cosine_to_score(1.0) - 1.0).abs() < 1e-6);
        assert!((cosine_to_score(0.0) - 0.5).abs() < 1e-6);
        assert!((cosine_to_score(-1.0) - 0.0).abs() < 1e-6);
        // Clipped against f32 drift outside [-1, 1]
        assert_eq!(cosine_to_score(1.000001), 1.0);
    }

    #[test]
    fn filters_match() {
        let attrs = VectorAttrs::new("/v/a.mp4")
            .with_duration(12.0)
            .with_tags(vec!["walking".to_string()]);

        assert!(attrs.matches(&SearchFilters::default()));
        assert!(attrs.matches(&SearchFilters {
            duration_min: Some(10.0),
            duration_max: Some(20.0),
            tags: None,
        }));
        assert!(!attrs.matches(&SearchFilters {
            duration_min: Some(15.0),
            ..Default::default()
        }));
        assert!(!attrs.matches(&SearchFilters {
            tags: Some(vec!["biking".to_string()]),
            ..Default::default()
        }));
        assert!(attrs.matches(&SearchFilters {
            tags: Some(vec!["biking".to_string(), "walking".to_string()]),
            ..Default::default()
        }));
    }

    #[test]
    fn missing_duration_fails_range_filters() {
        let attrs = VectorAttrs::new("/v/a.mp4");
        assert!(!attrs.matches(&SearchFilters {
            duration_min: Some(1.0),
            ..Default::default()
        }));
    }

    #[test]
    fn ranking_tie_break_is_lexicographic() {
        let mk = |id: &str, score: f32| ScoredHit {
            video_id: VideoId::from(id),
            similarity_score: score,
            distance: 1.0 - (2.0 * score - 1.0),
            attrs: VectorAttrs::new("p"),
        };
        let ranked = rank_hits(vec![mk("b", 0.9), mk("a", 0.9), mk("c", 0.95)], 10);
        let ids: Vec<&str> = ranked.iter().map(|h| h.video_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
