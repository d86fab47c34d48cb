//! Two-tier query encoding cache.
//!
//! Keyed by a content fingerprint (MD5 of the first MiB of the file).
//! Lookups go memory → disk → encoder, with a per-fingerprint critical
//! section so concurrent identical queries collapse to a single encode.
//! Corrupt disk entries are deleted and treated as misses.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use md5::{Digest, Md5};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use vmatch_encoder::VideoEncoder;
use vmatch_models::{VideoEncoding, VideoId};

use crate::codec::{decode_entry, encode_entry};
use crate::error::{StorageError, StorageResult};

const ENTRY_EXTENSION: &str = "vqc";

/// Content fingerprint: MD5 over the first [`Fingerprint::SAMPLE_BYTES`]
/// bytes of a file (the whole file when shorter).
///
/// Bytes past the sampled prefix do not affect the digest; callers who
/// need stricter identity must hash full contents themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Prefix length hashed from the file.
    pub const SAMPLE_BYTES: usize = 1_048_576;

    /// Fingerprint of an in-memory buffer.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let sample = &bytes[..bytes.len().min(Self::SAMPLE_BYTES)];
        Self(format!("{:x}", Md5::digest(sample)))
    }

    /// Fingerprint of a file's leading bytes.
    pub async fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut file = fs::File::open(path).await?;
        let mut sample = Vec::with_capacity(64 * 1024);
        let mut taken = (&mut file).take(Self::SAMPLE_BYTES as u64);
        taken.read_to_end(&mut sample).await?;
        Ok(Self::from_bytes(&sample))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct QueryCacheConfig {
    /// Directory of the disk tier
    pub dir: PathBuf,
    /// Memory tier byte budget
    pub memory_budget_bytes: usize,
    /// Disk tier byte budget
    pub disk_budget_bytes: u64,
}

impl QueryCacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            memory_budget_bytes: 256 * 1024 * 1024,
            disk_budget_bytes: 500 * 1024 * 1024,
        }
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = bytes;
        self
    }

    pub fn with_disk_budget(mut self, bytes: u64) -> Self {
        self.disk_budget_bytes = bytes;
        self
    }
}

/// Counters exposed through /stats and tests.
#[derive(Debug, Clone, Default)]
pub struct QueryCacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub encodes: u64,
    pub entries_in_memory: usize,
    pub memory_bytes: usize,
}

struct MemoryTier {
    entries: LruCache<String, Arc<VideoEncoding>>,
    bytes: usize,
    /// Per-fingerprint critical sections for encode coalescing.
    pending: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

/// Two-tier query cache.
pub struct QueryCache {
    config: QueryCacheConfig,
    state: Mutex<MemoryTier>,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    encodes: AtomicU64,
}

impl QueryCache {
    pub fn new(config: QueryCacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MemoryTier {
                // Byte-budget eviction is handled manually; the LRU cap
                // only bounds pathological entry counts.
                entries: LruCache::new(NonZeroUsize::new(100_000).expect("nonzero")),
                bytes: 0,
                pending: HashMap::new(),
            }),
            memory_hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            encodes: AtomicU64::new(0),
        }
    }

    /// Look up the encoding for the video at `path`, encoding at most once
    /// per fingerprint across concurrent callers.
    pub async fn get_or_encode(
        &self,
        path: &Path,
        encoder: &dyn VideoEncoder,
    ) -> StorageResult<Arc<VideoEncoding>> {
        let fingerprint = Fingerprint::from_file(path).await?;

        if let Some(hit) = self.memory_get(&fingerprint) {
            self.memory_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Query cache memory hit: {fingerprint}");
            return Ok(hit);
        }
        if let Some(hit) = self.disk_load(&fingerprint).await {
            self.disk_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Query cache disk hit: {fingerprint}");
            self.memory_put(&fingerprint, Arc::clone(&hit));
            return Ok(hit);
        }

        // Miss: enter the per-fingerprint critical section.
        let gate = {
            let mut state = self.state.lock().expect("cache lock");
            Arc::clone(
                state
                    .pending
                    .entry(fingerprint.as_str().to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        let _guard = gate.lock().await;

        // Double-checked: another caller may have filled the cache while
        // we waited on the gate.
        if let Some(hit) = self.memory_get(&fingerprint) {
            self.memory_hits.fetch_add(1, Ordering::Relaxed);
            self.remove_pending(&fingerprint);
            return Ok(hit);
        }
        if let Some(hit) = self.disk_load(&fingerprint).await {
            self.disk_hits.fetch_add(1, Ordering::Relaxed);
            self.memory_put(&fingerprint, Arc::clone(&hit));
            self.remove_pending(&fingerprint);
            return Ok(hit);
        }

        debug!("Query cache miss, encoding: {fingerprint}");
        self.encodes.fetch_add(1, Ordering::Relaxed);
        let mut encoding = match encoder.encode(path).await {
            Ok(encoding) => encoding,
            Err(e) => {
                self.remove_pending(&fingerprint);
                return Err(e.into());
            }
        };
        encoding.video_id = VideoId::from(format!("query_{fingerprint}"));
        let encoding = Arc::new(encoding);

        // Disk first, then memory; a failed disk write degrades to a
        // memory-only entry.
        if let Err(e) = self.disk_store(&fingerprint, &encoding).await {
            warn!("Failed to persist query cache entry {fingerprint}: {e}");
        }
        self.memory_put(&fingerprint, Arc::clone(&encoding));
        self.remove_pending(&fingerprint);

        Ok(encoding)
    }

    /// Drop an entry from both tiers.
    pub async fn evict(&self, fingerprint: &Fingerprint) -> StorageResult<()> {
        {
            let mut state = self.state.lock().expect("cache lock");
            if let Some(entry) = state.entries.pop(fingerprint.as_str()) {
                state.bytes = state.bytes.saturating_sub(entry.byte_size());
            }
        }
        let path = self.entry_path(fingerprint);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop everything from both tiers.
    pub async fn clear(&self) -> StorageResult<()> {
        {
            let mut state = self.state.lock().expect("cache lock");
            state.entries.clear();
            state.bytes = 0;
        }
        let mut entries = match fs::read_dir(&self.config.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                fs::remove_file(entry.path()).await.ok();
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> QueryCacheStats {
        let state = self.state.lock().expect("cache lock");
        QueryCacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            encodes: self.encodes.load(Ordering::Relaxed),
            entries_in_memory: state.entries.len(),
            memory_bytes: state.bytes,
        }
    }

    fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.config.dir.join(format!("{fingerprint}.{ENTRY_EXTENSION}"))
    }

    fn memory_get(&self, fingerprint: &Fingerprint) -> Option<Arc<VideoEncoding>> {
        let mut state = self.state.lock().expect("cache lock");
        state.entries.get(fingerprint.as_str()).cloned()
    }

    fn memory_put(&self, fingerprint: &Fingerprint, encoding: Arc<VideoEncoding>) {
        let mut state = self.state.lock().expect("cache lock");
        let size = encoding.byte_size();
        if let Some(prior) = state
            .entries
            .put(fingerprint.as_str().to_string(), encoding)
        {
            state.bytes = state.bytes.saturating_sub(prior.byte_size());
        }
        state.bytes += size;

        // Evict LRU-first down to the byte budget, always keeping the
        // most recent entry.
        while state.bytes > self.config.memory_budget_bytes && state.entries.len() > 1 {
            if let Some((_, evicted)) = state.entries.pop_lru() {
                state.bytes = state.bytes.saturating_sub(evicted.byte_size());
            } else {
                break;
            }
        }
    }

    fn remove_pending(&self, fingerprint: &Fingerprint) {
        let mut state = self.state.lock().expect("cache lock");
        state.pending.remove(fingerprint.as_str());
    }

    async fn disk_load(&self, fingerprint: &Fingerprint) -> Option<Arc<VideoEncoding>> {
        let path = self.entry_path(fingerprint);
        let bytes = fs::read(&path).await.ok()?;
        match decode_entry(&bytes) {
            Ok(encoding) => Some(Arc::new(encoding)),
            Err(e) => {
                // Corrupt entry: delete and treat as a miss.
                warn!("Deleting corrupt query cache entry {fingerprint}: {e}");
                fs::remove_file(&path).await.ok();
                None
            }
        }
    }

    async fn disk_store(
        &self,
        fingerprint: &Fingerprint,
        encoding: &VideoEncoding,
    ) -> StorageResult<()> {
        fs::create_dir_all(&self.config.dir).await?;
        let final_path = self.entry_path(fingerprint);
        let tmp_path = final_path.with_extension("vqc.tmp");

        let bytes = encode_entry(encoding);
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &final_path).await?;

        self.enforce_disk_budget().await
    }

    /// Delete oldest-modified entries until the disk tier fits its budget.
    async fn enforce_disk_budget(&self) -> StorageResult<()> {
        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(&self.config.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                let modified = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                entries.push((path, meta.len(), modified));
            }
        }

        let mut total: u64 = entries.iter().map(|(_, len, _)| len).sum();
        if total <= self.config.disk_budget_bytes {
            return Ok(());
        }

        entries.sort_by_key(|(_, _, modified)| *modified);
        for (path, len, _) in entries {
            if total <= self.config.disk_budget_bytes {
                break;
            }
            if fs::remove_file(&path).await.is_ok() {
                debug!("Evicted query cache file {}", path.display());
                total = total.saturating_sub(len);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmatch_encoder::OfflineEncoder;

    fn cache_in(dir: &Path) -> QueryCache {
        QueryCache::new(QueryCacheConfig::new(dir.join("query_cache")))
    }

    #[test]
    fn fingerprint_ignores_tail_past_sample() {
        let mut long = vec![7u8; Fingerprint::SAMPLE_BYTES + 4096];
        let base = Fingerprint::from_bytes(&long);

        // Mutate past the sampled prefix: fingerprint unchanged.
        let len = long.len();
        long[len - 1] = 0;
        assert_eq!(Fingerprint::from_bytes(&long), base);

        // Truncating the tail past the prefix: unchanged.
        long.truncate(Fingerprint::SAMPLE_BYTES);
        assert_eq!(Fingerprint::from_bytes(&long), base);

        // Mutating inside the prefix: changed.
        long[0] = 0;
        assert_ne!(Fingerprint::from_bytes(&long), base);
    }

    #[test]
    fn fingerprint_of_short_file_hashes_everything() {
        let a = Fingerprint::from_bytes(b"tiny");
        let b = Fingerprint::from_bytes(b"tinY");
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32); // 16-byte digest, hex
    }

    #[tokio::test]
    async fn file_and_buffer_fingerprints_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.mp4");
        std::fs::write(&path, b"query video bytes").unwrap();
        let from_file = Fingerprint::from_file(&path).await.unwrap();
        assert_eq!(from_file, Fingerprint::from_bytes(b"query video bytes"));
    }

    #[tokio::test]
    async fn second_lookup_hits_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let encoder = OfflineEncoder::new(16, 4);

        let video = dir.path().join("q.mp4");
        std::fs::write(&video, b"some query").unwrap();

        let first = cache.get_or_encode(&video, &encoder).await.unwrap();
        let second = cache.get_or_encode(&video, &encoder).await.unwrap();
        assert_eq!(first.global, second.global);
        assert!(first.video_id.as_str().starts_with("query_"));

        let stats = cache.stats();
        assert_eq!(stats.encodes, 1);
        assert_eq!(stats.memory_hits, 1);
    }

    #[tokio::test]
    async fn disk_tier_survives_memory_loss() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = OfflineEncoder::new(16, 4);
        let video = dir.path().join("q.mp4");
        std::fs::write(&video, b"some query").unwrap();

        let first = {
            let cache = cache_in(dir.path());
            cache.get_or_encode(&video, &encoder).await.unwrap()
        };

        // Fresh cache over the same directory: disk hit, no new encode.
        let cache = cache_in(dir.path());
        let second = cache.get_or_encode(&video, &encoder).await.unwrap();
        assert_eq!(first.global, second.global);
        assert_eq!(first.temporal, second.temporal);
        let stats = cache.stats();
        assert_eq!(stats.encodes, 0);
        assert_eq!(stats.disk_hits, 1);
    }

    #[tokio::test]
    async fn corrupt_disk_entry_is_deleted_and_reencoded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let encoder = OfflineEncoder::new(16, 4);
        let video = dir.path().join("q.mp4");
        std::fs::write(&video, b"some query").unwrap();

        cache.get_or_encode(&video, &encoder).await.unwrap();
        let fingerprint = Fingerprint::from_file(&video).await.unwrap();
        let entry_path = cache.entry_path(&fingerprint);
        std::fs::write(&entry_path, b"garbage").unwrap();

        // Fresh cache: corrupt disk entry must be removed and re-encoded.
        let cache = cache_in(dir.path());
        cache.get_or_encode(&video, &encoder).await.unwrap();
        assert_eq!(cache.stats().encodes, 1);

        let bytes = std::fs::read(&entry_path).unwrap();
        assert!(decode_entry(&bytes).is_ok());
    }

    #[tokio::test]
    async fn memory_budget_evicts_lru_first() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = OfflineEncoder::new(64, 8);
        // Each entry is (64 + 8*64) * 4 = 2304 bytes; budget fits two.
        let cache = QueryCache::new(
            QueryCacheConfig::new(dir.path().join("query_cache")).with_memory_budget(5000),
        );

        let mut paths = Vec::new();
        for i in 0..3 {
            let path = dir.path().join(format!("q{i}.mp4"));
            std::fs::write(&path, format!("query {i}")).unwrap();
            paths.push(path);
        }

        for path in &paths {
            cache.get_or_encode(path, &encoder).await.unwrap();
        }
        let stats = cache.stats();
        assert_eq!(stats.encodes, 3);
        assert_eq!(stats.entries_in_memory, 2);
        assert!(stats.memory_bytes <= 5000);

        // The oldest entry fell out of memory but still disk-hits.
        cache.get_or_encode(&paths[0], &encoder).await.unwrap();
        assert_eq!(cache.stats().encodes, 3);
        assert_eq!(cache.stats().disk_hits, 1);
    }

    #[tokio::test]
    async fn disk_budget_drops_oldest_files() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = OfflineEncoder::new(64, 8);
        // Entry files are ~2.4KB; budget of 6KB holds two.
        let cache = QueryCache::new(
            QueryCacheConfig::new(dir.path().join("query_cache")).with_disk_budget(6 * 1024),
        );

        for i in 0..4 {
            let path = dir.path().join(format!("q{i}.mp4"));
            std::fs::write(&path, format!("query number {i}")).unwrap();
            cache.get_or_encode(&path, &encoder).await.unwrap();
            // Distinct mtimes for deterministic eviction order
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let files: Vec<_> = std::fs::read_dir(dir.path().join("query_cache"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "vqc"))
            .collect();
        assert!(files.len() <= 3, "disk tier kept {} files", files.len());
    }

    #[tokio::test]
    async fn evict_and_clear_remove_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let encoder = OfflineEncoder::new(16, 4);
        let video = dir.path().join("q.mp4");
        std::fs::write(&video, b"some query").unwrap();

        cache.get_or_encode(&video, &encoder).await.unwrap();
        let fingerprint = Fingerprint::from_file(&video).await.unwrap();
        cache.evict(&fingerprint).await.unwrap();
        assert_eq!(cache.stats().entries_in_memory, 0);
        assert!(!cache.entry_path(&fingerprint).exists());

        cache.get_or_encode(&video, &encoder).await.unwrap();
        cache.clear().await.unwrap();
        assert_eq!(cache.stats().entries_in_memory, 0);
    }
}
