//! Temporal matrix store.
//!
//! One file per video id, path derivable from the id alone. Writes go to
//! a sidecar, are fsynced, then renamed over the final path, so a partial
//! write is never observable by a reader.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use vmatch_models::VideoId;

use crate::codec::{decode_matrix, encode_matrix};
use crate::error::{StorageError, StorageResult};

const FILE_SUFFIX: &str = "_temporal.vtf";

/// Content-addressed store of per-time-step matrices.
#[derive(Debug, Clone)]
pub struct TemporalStore {
    dir: PathBuf,
}

impl TemporalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path for a video id.
    pub fn path_for(&self, video_id: &VideoId) -> PathBuf {
        self.dir.join(format!("{video_id}{FILE_SUFFIX}"))
    }

    /// Atomically persist a matrix; overwrites any prior file for the id.
    pub async fn put(&self, video_id: &VideoId, matrix: &Array2<f32>) -> StorageResult<PathBuf> {
        fs::create_dir_all(&self.dir).await?;

        let final_path = self.path_for(video_id);
        let tmp_path = final_path.with_extension("vtf.tmp");

        let bytes = encode_matrix(matrix);
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &final_path).await?;
        debug!(
            "Stored temporal matrix {:?} for {} at {}",
            matrix.dim(),
            video_id,
            final_path.display()
        );
        Ok(final_path)
    }

    /// Load a matrix; digest and shape are verified on read.
    pub async fn get(&self, video_id: &VideoId) -> StorageResult<Array2<f32>> {
        let path = self.path_for(video_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(format!(
                    "temporal matrix for {video_id}"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        decode_matrix(&bytes)
    }

    pub async fn exists(&self, video_id: &VideoId) -> bool {
        fs::try_exists(self.path_for(video_id)).await.unwrap_or(false)
    }

    /// Remove the file for an id; returns whether it existed.
    pub async fn delete(&self, video_id: &VideoId) -> StorageResult<bool> {
        match fs::remove_file(self.path_for(video_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Ids of every stored matrix (for the garbage collector).
    pub async fn list_ids(&self) -> StorageResult<Vec<VideoId>> {
        let mut ids = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_suffix(FILE_SUFFIX) {
                if !id.is_empty() {
                    ids.push(VideoId::from(id));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Remove every stored matrix.
    pub async fn clear(&self) -> StorageResult<usize> {
        let ids = self.list_ids().await?;
        let mut removed = 0;
        for id in &ids {
            if self.delete(id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
