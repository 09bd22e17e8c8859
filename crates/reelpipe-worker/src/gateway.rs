//! Access to the video records owned by the catalogue service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reelpipe_models::{VideoId, VideoRecord, VideoStatus};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}

/// Reads and updates video records.
///
/// Every update touches a single row and is safe to repeat. Updating an
/// unknown id, or a record whose status may not move to the new one
/// (see [`VideoStatus::can_transition_to`]), is a no-op rather than an error.
#[async_trait]
pub trait VideoRecordGateway: Send + Sync {
    async fn get_by_id(&self, id: &VideoId) -> GatewayResult<Option<VideoRecord>>;

    async fn mark_processing(&self, id: &VideoId) -> GatewayResult<()>;

    async fn mark_processed(&self, id: &VideoId, processed_path: &str) -> GatewayResult<()>;

    async fn mark_failed(&self, id: &VideoId, reason: &str) -> GatewayResult<()>;
}

/// Records in the Postgres `videos` table.
#[derive(Clone)]
pub struct PgVideoRecords {
    pool: PgPool,
}

type VideoRow = (
    Uuid,
    Option<String>,
    Option<String>,
    String,
    Option<DateTime<Utc>>,
);

impl PgVideoRecords {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> GatewayResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        info!("Connected to video record store");
        Ok(Self::new(pool))
    }

    /// Ids are UUIDs in this table; anything else cannot match a row.
    fn row_id(id: &VideoId) -> Option<Uuid> {
        Uuid::parse_str(id.as_str()).ok()
    }

    /// Bind value for `status = ANY($n)`: the statuses allowed to move to `next`.
    fn source_statuses(next: VideoStatus) -> Vec<String> {
        VideoStatus::sources_of(next)
            .into_iter()
            .map(|status| status.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl VideoRecordGateway for PgVideoRecords {
    async fn get_by_id(&self, id: &VideoId) -> GatewayResult<Option<VideoRecord>> {
        let Some(row_id) = Self::row_id(id) else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, VideoRow>(
            "SELECT id, original_url, processed_url, status, processed_at FROM videos WHERE id = $1",
        )
        .bind(row_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(row_id, original, processed, status, processed_at)| {
            let status = status.parse::<VideoStatus>().unwrap_or_else(|e| {
                warn!(video_id = %row_id, "{}", e);
                VideoStatus::default()
            });
            VideoRecord {
                id: VideoId::from_string(row_id.to_string()),
                original_location: original.unwrap_or_default(),
                processed_location: processed,
                status,
                processed_at,
                failure_reason: None,
            }
        }))
    }

    async fn mark_processing(&self, id: &VideoId) -> GatewayResult<()> {
        let Some(row_id) = Self::row_id(id) else {
            return Ok(());
        };
        sqlx::query("UPDATE videos SET status = $1 WHERE id = $2 AND status = ANY($3)")
            .bind(VideoStatus::Processing.as_str())
            .bind(row_id)
            .bind(Self::source_statuses(VideoStatus::Processing))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_processed(&self, id: &VideoId, processed_path: &str) -> GatewayResult<()> {
        let Some(row_id) = Self::row_id(id) else {
            return Ok(());
        };
        let updated = sqlx::query(
            "UPDATE videos SET status = $1, processed_url = $2, processed_at = $3 \
             WHERE id = $4 AND status = ANY($5)",
        )
        .bind(VideoStatus::Processed.as_str())
        .bind(processed_path)
        .bind(Utc::now())
        .bind(row_id)
        .bind(Self::source_statuses(VideoStatus::Processed))
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            warn!(video_id = %id, "Processed artifact not recorded: record missing or not processing");
        }
        Ok(())
    }

    /// The table has no reason column; the reason only reaches the logs.
    async fn mark_failed(&self, id: &VideoId, reason: &str) -> GatewayResult<()> {
        let Some(row_id) = Self::row_id(id) else {
            return Ok(());
        };
        sqlx::query("UPDATE videos SET status = $1 WHERE id = $2 AND status = ANY($3)")
            .bind(VideoStatus::Failed.as_str())
            .bind(row_id)
            .bind(Self::source_statuses(VideoStatus::Failed))
            .execute(&self.pool)
            .await?;
        debug!(video_id = %id, reason = reason, "Marked video failed");
        Ok(())
    }
}

/// Records held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVideoRecords {
    records: Arc<RwLock<HashMap<String, VideoRecord>>>,
    fail_writes: Arc<std::sync::atomic::AtomicBool>,
}

impl InMemoryVideoRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: VideoRecord) {
        self.records
            .write()
            .await
            .insert(record.id.as_str().to_string(), record);
    }

    /// Make every update fail with `Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_writable(&self) -> GatewayResult<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }

    async fn update<F>(&self, id: &VideoId, next: VideoStatus, apply: F) -> GatewayResult<()>
    where
        F: FnOnce(&mut VideoRecord) + Send,
    {
        self.check_writable()?;
        if let Some(record) = self.records.write().await.get_mut(id.as_str()) {
            if record.status.can_transition_to(next) {
                record.status = next;
                apply(record);
            } else {
                debug!(video_id = %id, from = %record.status, to = %next, "Skipped status change");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VideoRecordGateway for InMemoryVideoRecords {
    async fn get_by_id(&self, id: &VideoId) -> GatewayResult<Option<VideoRecord>> {
        Ok(self.records.read().await.get(id.as_str()).cloned())
    }

    async fn mark_processing(&self, id: &VideoId) -> GatewayResult<()> {
        self.update(id, VideoStatus::Processing, |record| {
            record.failure_reason = None;
        })
        .await
    }

    async fn mark_processed(&self, id: &VideoId, processed_path: &str) -> GatewayResult<()> {
        let processed_path = processed_path.to_string();
        self.update(id, VideoStatus::Processed, move |record| {
            record.processed_location = Some(processed_path);
            record.processed_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_failed(&self, id: &VideoId, reason: &str) -> GatewayResult<()> {
        let reason = reason.to_string();
        self.update(id, VideoStatus::Failed, move |record| {
            record.failure_reason = Some(reason);
        })
        .await
    }
}
