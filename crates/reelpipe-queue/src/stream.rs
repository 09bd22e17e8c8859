//! Broker over Redis Streams with a consumer group.
//!
//! Entries carry two fields, `type` and `payload`. Failed entries stay in
//! the group's pending list and are claimed again once idle for the retry
//! backoff. A per-entry counter decides when an entry goes to the
//! dead-letter stream instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{wait_for_true, BrokerClient, TaskHandler};
use crate::config::{RedisSettings, MIN_RETRY_BACKOFF};
use crate::error::{QueueError, QueueResult};

const FIELD_TYPE: &str = "type";
const FIELD_PAYLOAD: &str = "payload";
/// Retry counters outlive any sane backoff schedule.
const RETRY_KEY_TTL_SECS: i64 = 86_400;
/// Pause after a failed read.
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// Most entries read or claimed per call.
const MAX_BATCH: usize = 10;

/// What happens to an entry after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Leave it pending; it is claimed again after the backoff.
    Retry { attempt: u32 },
    /// Move it to the dead-letter stream.
    DeadLetter { attempts: u32 },
}

impl RetryDecision {
    /// `failures` counts failed attempts including the current one.
    pub fn after_failure(failures: u32, max_retries: u32) -> Self {
        if failures >= max_retries {
            RetryDecision::DeadLetter { attempts: failures }
        } else {
            RetryDecision::Retry { attempt: failures }
        }
    }
}

/// A decoded stream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamTask {
    entry_id: String,
    task_type: String,
    payload: Vec<u8>,
}

impl StreamTask {
    /// `Err` carries the entry id of an entry that cannot be decoded.
    fn decode(entry: &StreamId) -> Result<Self, String> {
        let task_type: Option<String> = entry.get(FIELD_TYPE);
        let payload: Option<Vec<u8>> = entry.get(FIELD_PAYLOAD);
        match (task_type, payload) {
            (Some(task_type), Some(payload)) if !task_type.is_empty() => Ok(Self {
                entry_id: entry.id.clone(),
                task_type,
                payload,
            }),
            _ => Err(entry.id.clone()),
        }
    }
}

/// Redis Streams broker.
pub struct RedisBroker {
    client: redis::Client,
    settings: RedisSettings,
    concurrency: usize,
    consumer_name: String,
    closed: Arc<watch::Sender<bool>>,
}

impl RedisBroker {
    /// Create a broker. No connection is made until first use.
    pub fn new(settings: RedisSettings, concurrency: usize) -> QueueResult<Self> {
        // A shorter window would reclaim entries whose handlers are still running.
        if settings.retry_backoff < MIN_RETRY_BACKOFF {
            return Err(QueueError::config(format!(
                "retry backoff must be at least {:?}, got {:?}",
                MIN_RETRY_BACKOFF, settings.retry_backoff
            )));
        }
        let client = redis::Client::open(settings.url.as_str())?;
        let (closed, _) = watch::channel(false);
        Ok(Self {
            client,
            settings,
            concurrency: concurrency.max(1),
            consumer_name: format!("worker-{}", Uuid::new_v4()),
            closed: Arc::new(closed),
        })
    }

    /// Create and verify the connection with a PING.
    pub async fn connect(settings: RedisSettings, concurrency: usize) -> QueueResult<Self> {
        let broker = Self::new(settings, concurrency)?;
        let mut conn = broker.conn().await?;
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::connection_failed(format!("redis ping: {}", e)))?;
        Ok(broker)
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn retry_key(&self, entry_id: &str) -> String {
        format!("{}:retry:{}", self.settings.stream_name, entry_id)
    }

    /// Create the consumer group if it does not exist.
    ///
    /// The group starts at the beginning of the stream so tasks enqueued
    /// before the first worker came up are still delivered.
    pub async fn ensure_group(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.settings.stream_name)
            .arg(&self.settings.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => info!("Created consumer group: {}", self.settings.consumer_group),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.settings.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }
        Ok(())
    }

    /// Read entries never delivered to any consumer.
    async fn read_new(&self, count: usize) -> QueueResult<Vec<StreamId>> {
        let mut conn = self.conn().await?;
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.settings.consumer_group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(self.settings.block_timeout.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.settings.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default())
    }

    /// Claim entries idle for at least the retry backoff: failed attempts
    /// waiting for redelivery and entries orphaned by crashed consumers.
    async fn claim_idle(&self, count: usize) -> QueueResult<Vec<StreamId>> {
        let mut conn = self.conn().await?;
        let min_idle_ms = self.settings.retry_backoff.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.settings.stream_name)
            .arg(&self.settings.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.settings.stream_name)
            .arg(&self.settings.consumer_group)
            .arg(&self.consumer_name)
            .arg(min_idle_ms);
        for p in &pending.ids {
            cmd.arg(&p.id);
        }
        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        if !claimed.ids.is_empty() {
            info!("Claimed {} idle entries", claimed.ids.len());
        }
        Ok(claimed.ids)
    }

    /// Reset an entry's idle time so other consumers do not claim it while
    /// its handler is still running.
    async fn touch(&self, entry_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("XCLAIM")
            .arg(&self.settings.stream_name)
            .arg(&self.settings.consumer_group)
            .arg(&self.consumer_name)
            .arg(0)
            .arg(entry_id)
            .arg("JUSTID")
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Acknowledge and delete an entry, and drop its retry counter.
    async fn ack(&self, entry_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XACK")
            .arg(&self.settings.stream_name)
            .arg(&self.settings.consumer_group)
            .arg(entry_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.settings.stream_name)
            .arg(entry_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.del::<_, ()>(self.retry_key(entry_id)).await?;

        debug!("Acknowledged entry: {}", entry_id);
        Ok(())
    }

    async fn increment_retry(&self, entry_id: &str) -> QueueResult<u32> {
        let mut conn = self.conn().await?;
        let key = self.retry_key(entry_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, RETRY_KEY_TTL_SECS).await?;
        Ok(count)
    }

    async fn dead_letter(&self, task: &StreamTask, error: &str, attempts: u32) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XADD")
            .arg(&self.settings.dlq_stream_name)
            .arg("*")
            .arg(FIELD_TYPE)
            .arg(&task.task_type)
            .arg(FIELD_PAYLOAD)
            .arg(task.payload.as_slice())
            .arg("error")
            .arg(error)
            .arg("attempts")
            .arg(attempts)
            .arg("original_id")
            .arg(&task.entry_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(&task.entry_id).await?;
        warn!(
            task_type = %task.task_type,
            entry_id = %task.entry_id,
            "Moved task to DLQ after {} attempts: {}",
            attempts,
            error
        );
        Ok(())
    }

    /// Number of entries in the dead-letter stream.
    pub async fn dead_letter_depth(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.settings.dlq_stream_name).await?;
        Ok(len)
    }

    /// Run one entry through the handler and settle it.
    async fn execute(self: Arc<Self>, entry: StreamId, handler: Arc<dyn TaskHandler>) {
        let task = match StreamTask::decode(&entry) {
            Ok(task) => task,
            Err(entry_id) => {
                warn!(entry_id = %entry_id, "Dropping undecodable stream entry");
                if let Err(e) = self.ack(&entry_id).await {
                    error!("Failed to ack undecodable entry {}: {}", entry_id, e);
                }
                return;
            }
        };

        debug!(task_type = %task.task_type, entry_id = %task.entry_id, "Executing task");

        let heartbeat_every = (self.settings.retry_backoff / 3).max(Duration::from_secs(1));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        let work = handler.handle(&task.task_type, &task.payload);
        tokio::pin!(work);

        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.touch(&task.entry_id).await {
                        warn!(entry_id = %task.entry_id, "Failed to refresh entry ownership: {}", e);
                    }
                }
            }
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.ack(&task.entry_id).await {
                    error!(entry_id = %task.entry_id, "Failed to ack task: {}", e);
                }
            }
            Err(handler_error) => {
                let message = handler_error.to_string();
                // A broken counter must not retry forever.
                let failures = match self.increment_retry(&task.entry_id).await {
                    Ok(n) => n,
                    Err(e) => {
                        error!("Failed to bump retry counter for {}: {}", task.entry_id, e);
                        u32::MAX
                    }
                };

                match RetryDecision::after_failure(failures, self.settings.max_retries) {
                    RetryDecision::Retry { attempt } => {
                        info!(
                            task_type = %task.task_type,
                            entry_id = %task.entry_id,
                            "Task failed (attempt {}/{}), will be retried: {}",
                            attempt,
                            self.settings.max_retries,
                            message
                        );
                    }
                    RetryDecision::DeadLetter { attempts } => {
                        let attempts = attempts.min(self.settings.max_retries);
                        if let Err(e) = self.dead_letter(&task, &message, attempts).await {
                            error!("Failed to move task {} to DLQ: {}", task.entry_id, e);
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl BrokerClient for RedisBroker {
    fn broker_name(&self) -> &'static str {
        "redis"
    }

    async fn enqueue(&self, task_type: &str, payload: &[u8]) -> QueueResult<()> {
        if *self.closed.borrow() {
            return Err(QueueError::Closed);
        }
        let mut conn = self.conn().await?;
        let entry_id: String = redis::cmd("XADD")
            .arg(&self.settings.stream_name)
            .arg("*")
            .arg(FIELD_TYPE)
            .arg(task_type)
            .arg(FIELD_PAYLOAD)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!(task_type = %task_type, entry_id = %entry_id, "Enqueued task");
        Ok(())
    }

    async fn start_worker(
        &self,
        handler: Arc<dyn TaskHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> QueueResult<()> {
        self.ensure_group().await?;

        // Handlers need an owned broker; share one that reuses our client.
        let broker = Arc::new(Self {
            client: self.client.clone(),
            settings: self.settings.clone(),
            concurrency: self.concurrency,
            consumer_name: self.consumer_name.clone(),
            closed: Arc::clone(&self.closed),
        });
        let mut closed = self.closed.subscribe();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        info!(
            "Starting Redis worker '{}' with concurrency {}",
            self.consumer_name, self.concurrency
        );

        let mut last_claim: Option<Instant> = None;

        loop {
            if *shutdown.borrow() || *closed.borrow() {
                break;
            }

            let available = semaphore.available_permits();
            if available == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                    _ = wait_for_true(&mut shutdown) => break,
                    _ = wait_for_true(&mut closed) => break,
                }
                continue;
            }
            let batch = available.min(MAX_BATCH);

            let claim_due = last_claim
                .map(|t| t.elapsed() >= self.settings.retry_backoff)
                .unwrap_or(true);

            let fetched = async {
                let mut entries = Vec::new();
                if claim_due {
                    entries = broker.claim_idle(batch).await?;
                }
                if entries.is_empty() {
                    entries = broker.read_new(batch).await?;
                }
                Ok::<_, QueueError>(entries)
            };

            let fetched = tokio::select! {
                result = fetched => result,
                _ = wait_for_true(&mut shutdown) => break,
                _ = wait_for_true(&mut closed) => break,
            };
            if claim_due {
                last_claim = Some(Instant::now());
            }

            let entries = match fetched {
                Ok(entries) => entries,
                Err(e) => {
                    error!("Error reading from stream: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(READ_ERROR_BACKOFF) => {}
                        _ = wait_for_true(&mut shutdown) => break,
                        _ = wait_for_true(&mut closed) => break,
                    }
                    continue;
                }
            };

            for entry in entries {
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let broker = Arc::clone(&broker);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let _permit = permit;
                    broker.execute(entry, handler).await;
                });
            }
        }

        info!("Stopping Redis worker, waiting for in-flight tasks...");
        let drained = tokio::time::timeout(
            self.settings.drain_timeout,
            semaphore.acquire_many(self.concurrency as u32),
        )
        .await;
        if drained.is_err() {
            warn!(
                "In-flight tasks still running after {:?}; they will be claimed again",
                self.settings.drain_timeout
            );
        }

        info!("Redis worker stopped");
        Ok(())
    }

    async fn close(&self) -> QueueResult<()> {
        self.closed.send_replace(true);
        info!("Redis broker closed");
        Ok(())
    }

    async fn queue_depth(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.settings.stream_name).await?;

        let pending: Result<redis::streams::StreamPendingReply, redis::RedisError> =
            redis::cmd("XPENDING")
                .arg(&self.settings.stream_name)
                .arg(&self.settings.consumer_group)
                .query_async(&mut conn)
                .await;

        let pending = match pending {
            Ok(reply) => reply.count() as u64,
            // No group yet: nothing has been delivered.
            Err(e) if e.code() == Some("NOGROUP") => 0,
            Err(e) => return Err(QueueError::Redis(e)),
        };

        Ok(len.saturating_sub(pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(id: &str, fields: &[(&str, &[u8])]) -> StreamId {
        StreamId {
            id: id.to_string(),
            map: fields
                .iter()
                .map(|(k, v)| (k.to_string(), redis::Value::BulkString(v.to_vec())))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_decode_entry() {
        let task = StreamTask::decode(&entry(
            "1-0",
            &[("type", b"video:processing"), ("payload", br#"{"video_id":"v1"}"#)],
        ))
        .unwrap();
        assert_eq!(task.entry_id, "1-0");
        assert_eq!(task.task_type, "video:processing");
        assert_eq!(task.payload, br#"{"video_id":"v1"}"#.to_vec());
    }

    #[test]
    fn test_decode_rejects_incomplete_entries() {
        assert_eq!(
            StreamTask::decode(&entry("2-0", &[("payload", b"{}")])),
            Err("2-0".to_string())
        );
        assert_eq!(
            StreamTask::decode(&entry("3-0", &[("type", b"video:processing")])),
            Err("3-0".to_string())
        );
        assert!(StreamTask::decode(&entry("4-0", &[("type", b""), ("payload", b"{}")])).is_err());
    }

    #[test]
    fn test_retry_decision() {
        assert_eq!(
            RetryDecision::after_failure(1, 3),
            RetryDecision::Retry { attempt: 1 }
        );
        assert_eq!(
            RetryDecision::after_failure(2, 3),
            RetryDecision::Retry { attempt: 2 }
        );
        assert_eq!(
            RetryDecision::after_failure(3, 3),
            RetryDecision::DeadLetter { attempts: 3 }
        );
        assert_eq!(
            RetryDecision::after_failure(u32::MAX, 3),
            RetryDecision::DeadLetter { attempts: u32::MAX }
        );
    }

    #[test]
    fn test_new_does_not_connect() {
        let broker = RedisBroker::new(RedisSettings::default(), 0).unwrap();
        assert_eq!(broker.concurrency, 1);
        assert!(broker.consumer_name().starts_with("worker-"));
        assert_eq!(broker.retry_key("5-1"), "reelpipe:tasks:retry:5-1");
    }

    #[test]
    fn test_short_retry_backoff_rejected() {
        let err = RedisBroker::new(
            RedisSettings {
                retry_backoff: Duration::ZERO,
                ..Default::default()
            },
            1,
        )
        .err()
        .unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RedisBroker::new(
            RedisSettings {
                url: "not a url".into(),
                ..Default::default()
            },
            1
        )
        .is_err());
    }
}
