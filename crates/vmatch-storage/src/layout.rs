//! On-disk layout under the storage root.

use std::path::{Path, PathBuf};

use vmatch_models::VideoId;

/// Directory layout:
///
/// ```text
/// <root>/temporal_features/<video_id>_temporal.vtf
/// <root>/query_cache/<fingerprint>.vqc
/// <root>/videos/...            (transient downloads)
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout rooted at `STORAGE_PATH` (default `./storage`).
    pub fn from_env() -> Self {
        Self::new(std::env::var("STORAGE_PATH").unwrap_or_else(|_| "./storage".to_string()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temporal_dir(&self) -> PathBuf {
        self.root.join("temporal_features")
    }

    pub fn query_cache_dir(&self) -> PathBuf {
        self.root.join("query_cache")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("videos")
    }

    /// Transient download destination for a video.
    pub fn download_path(&self, video_id: &VideoId, extension: &str) -> PathBuf {
        self.downloads_dir()
            .join(format!("{video_id}.{extension}"))
    }

    /// Create all directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.temporal_dir())?;
        std::fs::create_dir_all(self.query_cache_dir())?;
        std::fs::create_dir_all(self.downloads_dir())?;
        Ok(())
    }
}
