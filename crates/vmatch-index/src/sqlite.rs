//! SQLite-backed vector index.
//!
//! Embeddings are stored as little-endian f32 BLOBs and scanned exactly
//! in Rust. Duration filters are pushed into SQL; tag filters are applied
//! while scanning. WAL mode keeps readers unblocked during inserts.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use vmatch_models::{SearchFilters, VideoId};

use crate::error::{IndexError, IndexResult};
use crate::{cosine_to_score, dot, rank_hits, ScoredHit, VectorAttrs, VectorIndex};

/// Persistent vector index on SQLite.
pub struct SqliteVectorIndex {
    dimension: usize,
    conn: Mutex<Connection>,
}

impl SqliteVectorIndex {
    /// Open (or create) an index at `path`.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> IndexResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let index = Self::init(conn, dimension)?;
        info!("Opened vector index at {}", path.display());
        Ok(index)
    }

    /// Open an in-memory index (tests).
    pub fn open_in_memory(dimension: usize) -> IndexResult<Self> {
        Self::init(Connection::open_in_memory()?, dimension)
    }

    fn init(conn: Connection, dimension: usize) -> IndexResult<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS vectors (
                video_id TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                video_path TEXT NOT NULL,
                duration REAL,
                created_at TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_vectors_duration ON vectors(duration);
            "#,
        )?;
        Ok(Self {
            dimension,
            conn: Mutex::new(conn),
        })
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

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for &x in vector {
        blob.extend_from_slice(&x.to_le_bytes());
    }
    blob
}

fn blob_to_vector(video_id: &str, blob: &[u8]) -> IndexResult<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(IndexError::Corrupt(
            video_id.to_string(),
            format!("embedding blob length {} not a multiple of 4", blob.len()),
        ));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn join_tags(tags: &[String]) -> String {
    tags.join(",")
}

fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn insert(
        &self,
        video_id: &VideoId,
        vector: &[f32],
        attrs: VectorAttrs,
    ) -> IndexResult<()> {
        self.check_dimension(vector)?;
        let conn = self.conn.lock().expect("index db lock");
        conn.execute(
            "INSERT OR REPLACE INTO vectors
             (video_id, embedding, video_path, duration, created_at, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                video_id.as_str(),
                vector_to_blob(vector),
                attrs.video_path,
                attrs.duration,
                attrs.created_at.to_rfc3339(),
                join_tags(&attrs.tags),
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, video_id: &VideoId) -> IndexResult<bool> {
        let conn = self.conn.lock().expect("index db lock");
        let affected = conn.execute(
            "DELETE FROM vectors WHERE video_id = ?1",
            params![video_id.as_str()],
        )?;
        Ok(affected > 0)
    }

    async fn contains(&self, video_id: &VideoId) -> IndexResult<bool> {
        let conn = self.conn.lock().expect("index db lock");
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM vectors WHERE video_id = ?1",
                params![video_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
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

        let conn = self.conn.lock().expect("index db lock");
        let mut stmt = conn.prepare(
            "SELECT video_id, embedding, video_path, duration, created_at, tags
             FROM vectors
             WHERE (?1 IS NULL OR duration >= ?1)
               AND (?2 IS NULL OR duration <= ?2)",
        )?;

        let rows = stmt.query_map(params![filters.duration_min, filters.duration_max], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let wanted_tags = filters.tags.as_deref().unwrap_or(&[]);
        let mut hits = Vec::new();
        for row in rows {
            let (id, blob, video_path, duration, created_at, tags) = row?;
            let tags = split_tags(&tags);
            if !wanted_tags.is_empty() && !wanted_tags.iter().any(|t| tags.contains(t)) {
                continue;
            }
            // Range filters exclude rows with no recorded duration.
            if (filters.duration_min.is_some() || filters.duration_max.is_some())
                && duration.is_none()
            {
                continue;
            }
            let embedding = blob_to_vector(&id, &blob)?;
            if embedding.len() != self.dimension {
                return Err(IndexError::Corrupt(
                    id,
                    format!("stored dimension {}", embedding.len()),
                ));
            }
            let cosine = dot(vector, &embedding);
            hits.push(ScoredHit {
                video_id: VideoId::from(id),
                similarity_score: cosine_to_score(cosine),
                distance: 1.0 - cosine,
                attrs: VectorAttrs {
                    video_path,
                    duration,
                    created_at: created_at
                        .parse::<DateTime<Utc>>()
                        .unwrap_or_else(|_| Utc::now()),
                    tags,
                },
            });
        }

        Ok(rank_hits(hits, top_k))
    }

    async fn list_ids(&self) -> IndexResult<Vec<VideoId>> {
        let conn = self.conn.lock().expect("index db lock");
        let mut stmt = conn.prepare("SELECT video_id FROM vectors ORDER BY video_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(VideoId::from).collect())
    }

    async fn count(&self) -> IndexResult<usize> {
        let conn = self.conn.lock().expect("index db lock");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn clear(&self) -> IndexResult<()> {
        let conn = self.conn.lock().expect("index db lock");
        conn.execute("DELETE FROM vectors", [])?;
        Ok(())
    }
}
