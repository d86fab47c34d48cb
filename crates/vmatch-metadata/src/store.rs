//! SQLite metadata store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use vmatch_models::{
    IndexStatus, IndexingJob, JobId, JobStatus, QueryClick, QueryId, VideoId, VideoRecord,
    VideoStatus,
};

use crate::error::{MetadataError, MetadataResult};

/// Bounded retry for busy/locked writes.
const CONFLICT_RETRIES: u32 = 3;
const CONFLICT_BACKOFF: Duration = Duration::from_millis(50);

/// One logged search query.
#[derive(Debug, Clone)]
pub struct QueryLogEntry {
    pub query_id: QueryId,
    pub user_id: Option<String>,
    pub query_video_url: String,
    pub filters_json: Option<String>,
    pub num_results: usize,
    pub processing_time_ms: f64,
}

/// Transactional store for videos, jobs and query logs.
pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        info!("Opened metadata store at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory store (tests).
    pub fn open_in_memory() -> MetadataResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> MetadataResult<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS videos (
                video_id TEXT PRIMARY KEY,
                video_url TEXT NOT NULL DEFAULT '',
                title TEXT,
                duration REAL,
                resolution TEXT,
                fps REAL,
                file_size INTEGER,
                created_at TEXT NOT NULL,
                indexed_at TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                error_message TEXT,
                temporal_features_path TEXT,
                thumbnail_url TEXT,
                processing_time_ms REAL,
                extra TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_videos_status ON videos(status);

            CREATE TABLE IF NOT EXISTS indexing_jobs (
                job_id TEXT PRIMARY KEY,
                total_videos INTEGER NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'queued',
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS search_queries (
                query_id TEXT PRIMARY KEY,
                user_id TEXT,
                query_video_url TEXT NOT NULL,
                filters TEXT,
                num_results INTEGER NOT NULL,
                processing_time_ms REAL NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS search_clicks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_id TEXT NOT NULL,
                result_video_id TEXT NOT NULL,
                rank INTEGER NOT NULL,
                similarity_score REAL NOT NULL,
                clicked_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a write with bounded retry on busy/locked conflicts.
    async fn with_conflict_retry<T>(
        &self,
        op: impl Fn(&Connection) -> MetadataResult<T>,
    ) -> MetadataResult<T> {
        let mut attempt = 0;
        loop {
            let result = {
                let conn = self.conn.lock().expect("metadata db lock");
                op(&conn)
            };
            match result {
                Err(e) if e.is_conflict() && attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!("Metadata conflict (attempt {attempt}), retrying: {e}");
                    tokio::time::sleep(CONFLICT_BACKOFF * attempt).await;
                }
                other => return other,
            }
        }
    }

    // ------------------------------------------------------------------
    // Videos
    // ------------------------------------------------------------------

    /// Insert or fully update a video record.
    pub async fn upsert_video(&self, record: &VideoRecord) -> MetadataResult<()> {
        let record = record.clone();
        self.with_conflict_retry(move |conn| {
            conn.execute(
                r#"
                INSERT INTO videos
                    (video_id, video_url, title, duration, resolution, fps, file_size,
                     created_at, indexed_at, status, error_message,
                     temporal_features_path, thumbnail_url, processing_time_ms, extra)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                ON CONFLICT(video_id) DO UPDATE SET
                    video_url = excluded.video_url,
                    title = excluded.title,
                    duration = excluded.duration,
                    resolution = excluded.resolution,
                    fps = excluded.fps,
                    file_size = excluded.file_size,
                    indexed_at = excluded.indexed_at,
                    status = excluded.status,
                    error_message = excluded.error_message,
                    temporal_features_path = excluded.temporal_features_path,
                    thumbnail_url = excluded.thumbnail_url,
                    processing_time_ms = excluded.processing_time_ms,
                    extra = excluded.extra
                "#,
                params![
                    record.video_id.as_str(),
                    record.video_url,
                    record.title,
                    record.duration,
                    record.resolution,
                    record.fps,
                    record.file_size.map(|s| s as i64),
                    record.created_at.to_rfc3339(),
                    record.indexed_at.map(|t| t.to_rfc3339()),
                    record.status.as_str(),
                    record.error_message,
                    record.temporal_features_path,
                    record.thumbnail_url,
                    record.processing_time_ms,
                    serde_json::to_string(&record.extra)?,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Transition a video's status, creating a stub row when none exists.
    pub async fn set_video_status(
        &self,
        video_id: &VideoId,
        status: VideoStatus,
        error: Option<&str>,
    ) -> MetadataResult<()> {
        let id = video_id.clone();
        let error = error.map(String::from);
        self.with_conflict_retry(move |conn| {
            let now = Utc::now().to_rfc3339();
            let indexed_at = status.is_terminal().then(|| now.clone());
            let affected = conn.execute(
                r#"
                UPDATE videos SET
                    status = ?2,
                    error_message = ?3,
                    indexed_at = COALESCE(?4, indexed_at)
                WHERE video_id = ?1
                "#,
                params![id.as_str(), status.as_str(), error, indexed_at],
            )?;
            if affected == 0 {
                conn.execute(
                    "INSERT INTO videos (video_id, created_at, status, error_message, indexed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id.as_str(), now, status.as_str(), error, indexed_at],
                )?;
            }
            debug!("Video {id} status -> {status}");
            Ok(())
        })
        .await
    }

    /// Fetch a video record.
    pub async fn get_video(&self, video_id: &VideoId) -> MetadataResult<Option<VideoRecord>> {
        let conn = self.conn.lock().expect("metadata db lock");
        conn.query_row(
            "SELECT video_id, video_url, title, duration, resolution, fps, file_size,
                    created_at, indexed_at, status, error_message,
                    temporal_features_path, thumbnail_url, processing_time_ms, extra
             FROM videos WHERE video_id = ?1",
            params![video_id.as_str()],
            row_to_record,
        )
        .optional()
        .map_err(MetadataError::from)
    }

    /// Delete a video row; returns whether it existed.
    pub async fn delete_video(&self, video_id: &VideoId) -> MetadataResult<bool> {
        let id = video_id.clone();
        self.with_conflict_retry(move |conn| {
            let affected =
                conn.execute("DELETE FROM videos WHERE video_id = ?1", params![id.as_str()])?;
            Ok(affected > 0)
        })
        .await
    }

    /// All video ids with the given status.
    pub async fn list_videos_by_status(
        &self,
        status: VideoStatus,
    ) -> MetadataResult<Vec<VideoId>> {
        let conn = self.conn.lock().expect("metadata db lock");
        let mut stmt =
            conn.prepare("SELECT video_id FROM videos WHERE status = ?1 ORDER BY video_id")?;
        let ids = stmt
            .query_map(params![status.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(VideoId::from).collect())
    }

    /// All video ids.
    pub async fn list_video_ids(&self) -> MetadataResult<Vec<VideoId>> {
        let conn = self.conn.lock().expect("metadata db lock");
        let mut stmt = conn.prepare("SELECT video_id FROM videos ORDER BY video_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(VideoId::from).collect())
    }

    /// Number of video rows.
    pub async fn count_videos(&self) -> MetadataResult<usize> {
        let conn = self.conn.lock().expect("metadata db lock");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM videos", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Admin: remove every video row.
    pub async fn clear_videos(&self) -> MetadataResult<usize> {
        self.with_conflict_retry(|conn| Ok(conn.execute("DELETE FROM videos", [])?))
            .await
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Create a new job row.
    pub async fn create_job(&self, job: &IndexingJob) -> MetadataResult<()> {
        let job = job.clone();
        self.with_conflict_retry(move |conn| {
            conn.execute(
                "INSERT INTO indexing_jobs
                 (job_id, total_videos, completed, failed, status, created_at,
                  started_at, completed_at, error_message, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    job.job_id.as_str(),
                    job.total_videos,
                    job.completed,
                    job.failed,
                    job.status.as_str(),
                    job.created_at.to_rfc3339(),
                    job.started_at.map(|t| t.to_rfc3339()),
                    job.completed_at.map(|t| t.to_rfc3339()),
                    job.error_message,
                    serde_json::to_string(&job.metadata)?,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Update job counters and optionally its status.
    ///
    /// `started_at` is stamped on the first transition to processing and
    /// `completed_at` when the status turns terminal.
    pub async fn update_job(
        &self,
        job_id: &JobId,
        completed: u32,
        failed: u32,
        status: Option<JobStatus>,
        error: Option<&str>,
    ) -> MetadataResult<()> {
        let id = job_id.clone();
        let error = error.map(String::from);
        self.with_conflict_retry(move |conn| {
            let now = Utc::now().to_rfc3339();
            let affected = conn.execute(
                r#"
                UPDATE indexing_jobs SET
                    completed = ?2,
                    failed = ?3,
                    status = COALESCE(?4, status),
                    started_at = CASE
                        WHEN ?4 = 'processing' AND started_at IS NULL THEN ?6
                        ELSE started_at
                    END,
                    completed_at = CASE
                        WHEN ?4 IN ('completed', 'completed_with_errors', 'failed') THEN ?6
                        ELSE completed_at
                    END,
                    error_message = COALESCE(?5, error_message)
                WHERE job_id = ?1
                "#,
                params![
                    id.as_str(),
                    completed,
                    failed,
                    status.map(|s| s.as_str()),
                    error,
                    now,
                ],
            )?;
            if affected == 0 {
                return Err(MetadataError::NotFound(format!("job {id}")));
            }
            Ok(())
        })
        .await
    }

    /// Fetch a job row.
    pub async fn get_job(&self, job_id: &JobId) -> MetadataResult<Option<IndexingJob>> {
        let conn = self.conn.lock().expect("metadata db lock");
        conn.query_row(
            "SELECT job_id, total_videos, completed, failed, status, created_at,
                    started_at, completed_at, error_message, metadata
             FROM indexing_jobs WHERE job_id = ?1",
            params![job_id.as_str()],
            row_to_job,
        )
        .optional()
        .map_err(MetadataError::from)
    }

    /// Derived status snapshot for callers (progress + ETA).
    pub async fn job_status(&self, job_id: &JobId) -> MetadataResult<Option<IndexStatus>> {
        let Some(job) = self.get_job(job_id).await? else {
            return Ok(None);
        };
        Ok(Some(IndexStatus {
            job_id: job.job_id.clone(),
            status: job.status,
            total_videos: job.total_videos,
            completed: job.completed,
            failed: job.failed,
            progress_percentage: job.progress_percentage(),
            eta_seconds: job.eta_seconds(Utc::now()),
        }))
    }

    // ------------------------------------------------------------------
    // Query / click logs (append-only)
    // ------------------------------------------------------------------

    /// Append a search query log entry.
    pub async fn log_query(&self, entry: &QueryLogEntry) -> MetadataResult<()> {
        let entry = entry.clone();
        self.with_conflict_retry(move |conn| {
            conn.execute(
                "INSERT INTO search_queries
                 (query_id, user_id, query_video_url, filters, num_results,
                  processing_time_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.query_id.as_str(),
                    entry.user_id,
                    entry.query_video_url,
                    entry.filters_json,
                    entry.num_results as i64,
                    entry.processing_time_ms,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Append a click log entry.
    pub async fn log_click(&self, click: &QueryClick) -> MetadataResult<()> {
        let click = click.clone();
        self.with_conflict_retry(move |conn| {
            conn.execute(
                "INSERT INTO search_clicks
                 (query_id, result_video_id, rank, similarity_score, clicked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    click.query_id.as_str(),
                    click.video_id.as_str(),
                    click.rank,
                    click.similarity_score as f64,
                    click.clicked_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Number of logged queries (used by tests and stats).
    pub async fn count_queries(&self) -> MetadataResult<usize> {
        let conn = self.conn.lock().expect("metadata db lock");
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM search_queries", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn parse_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| s.parse().ok())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<VideoRecord> {
    let extra_json: String = row.get(14)?;
    let extra: HashMap<String, String> = serde_json::from_str(&extra_json).unwrap_or_default();
    let status: String = row.get(9)?;
    Ok(VideoRecord {
        video_id: VideoId::from(row.get::<_, String>(0)?),
        video_url: row.get(1)?,
        title: row.get(2)?,
        duration: row.get(3)?,
        resolution: row.get(4)?,
        fps: row.get(5)?,
        file_size: row.get::<_, Option<i64>>(6)?.map(|s| s as u64),
        created_at: parse_ts(row.get(7)?).unwrap_or_else(Utc::now),
        indexed_at: parse_ts(row.get(8)?),
        status: VideoStatus::parse(&status).unwrap_or_default(),
        error_message: row.get(10)?,
        temporal_features_path: row.get(11)?,
        thumbnail_url: row.get(12)?,
        processing_time_ms: row.get(13)?,
        extra,
    })
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexingJob> {
    let metadata_json: String = row.get(9)?;
    let metadata: HashMap<String, String> =
        serde_json::from_str(&metadata_json).unwrap_or_default();
    let status: String = row.get(4)?;
    Ok(IndexingJob {
        job_id: JobId::from_string(row.get::<_, String>(0)?),
        total_videos: row.get(1)?,
        completed: row.get(2)?,
        failed: row.get(3)?,
        status: JobStatus::parse(&status).unwrap_or_default(),
        created_at: parse_ts(row.get(5)?).unwrap_or_else(Utc::now),
        started_at: parse_ts(row.get(6)?),
        completed_at: parse_ts(row.get(7)?),
        error_message: row.get(8)?,
        metadata,
    })
}
