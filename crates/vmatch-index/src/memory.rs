//! In-memory vector index.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use vmatch_models::{SearchFilters, VideoId};

use crate::error::{IndexError, IndexResult};
use crate::{cosine_to_score, dot, rank_hits, ScoredHit, VectorAttrs, VectorIndex};

/// Simple exact-scan index held in a map. Fine for tests and corpora
/// that fit in memory.
pub struct MemoryVectorIndex {
    dimension: usize,
    entries: RwLock<HashMap<VideoId, (Vec<f32>, VectorAttrs)>>,
}

impl MemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> IndexResult<()> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn insert(
        &self,
        video_id: &VideoId,
        vector: &[f32],
        attrs: VectorAttrs,
    ) -> IndexResult<()> {
        self.check_dimension(vector)?;
        self.entries
            .write()
            .expect("index lock")
            .insert(video_id.clone(), (vector.to_vec(), attrs));
        Ok(())
    }

    async fn delete(&self, video_id: &VideoId) -> IndexResult<bool> {
        Ok(self
            .entries
            .write()
            .expect("index lock")
            .remove(video_id)
            .is_some())
    }

    async fn contains(&self, video_id: &VideoId) -> IndexResult<bool> {
        Ok(self
            .entries
            .read()
            .expect("index lock")
            .contains_key(video_id))
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> IndexResult<Vec<ScoredHit>> {
        self.check_dimension(vector)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().expect("index lock");
        let hits: Vec<ScoredHit> = entries
            .iter()
            .filter(|(_, (_, attrs))| attrs.matches(filters))
            .map(|(id, (embedding, attrs))| {
                let cosine = dot(vector, embedding);
                ScoredHit {
                    video_id: id.clone(),
                    similarity_score: cosine_to_score(cosine),
                    distance: 1.0 - cosine,
                    attrs: attrs.clone(),
                }
            })
            .collect();

        Ok(rank_hits(hits, top_k))
    }

    async fn list_ids(&self) -> IndexResult<Vec<VideoId>> {
        let mut ids: Vec<VideoId> = self
            .entries
            .read()
            .expect("index lock")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn count(&self) -> IndexResult<usize> {
        Ok(self.entries.read().expect("index lock").len())
    }

    async fn clear(&self) -> IndexResult<()> {
        self.entries.write().expect("index lock").clear();
        Ok(())
    }
}
