//! Queue configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{QueueError, QueueResult};

/// Shortest accepted Redis retry backoff. Running handlers refresh their
/// entries every third of the backoff, and an entry idle for the full
/// backoff is claimed again, so the window must span several heartbeats.
pub const MIN_RETRY_BACKOFF: Duration = Duration::from_secs(3);

/// Which broker variant to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    Redis,
    Sqs,
}

impl FromStr for BrokerKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(BrokerKind::Redis),
            "sqs" => Ok(BrokerKind::Sqs),
            other => Err(QueueError::config(format!(
                "unsupported queue type: {} (supported: redis, sqs)",
                other
            ))),
        }
    }
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerKind::Redis => f.write_str("redis"),
            BrokerKind::Sqs => f.write_str("sqs"),
        }
    }
}

/// Redis Streams settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    /// Redis URL
    pub url: String,
    /// Stream name for tasks
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// Delivery attempts before a task is dead-lettered
    pub max_retries: u32,
    /// Idle time before a failed or orphaned task is claimed again
    pub retry_backoff: Duration,
    /// How long one XREADGROUP call blocks
    pub block_timeout: Duration,
    /// How long shutdown waits for in-flight handlers
    pub drain_timeout: Duration,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            stream_name: "reelpipe:tasks".to_string(),
            consumer_group: "reelpipe:workers".to_string(),
            dlq_stream_name: "reelpipe:dlq".to_string(),
            max_retries: 3,
            retry_backoff: Duration::from_secs(30),
            block_timeout: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(60),
        }
    }
}

/// SQS settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsSettings {
    /// Queue URL (required for the SQS broker)
    pub queue_url: Option<String>,
    /// Region
    pub region: String,
    /// Custom endpoint (e.g. LocalStack)
    pub endpoint_url: Option<String>,
    /// Lease length of a received message
    pub visibility_timeout: Duration,
    /// Long-poll wait per receive call
    pub wait_time: Duration,
    /// Pause after a failed receive call
    pub receive_error_backoff: Duration,
}

impl Default for SqsSettings {
    fn default() -> Self {
        Self {
            queue_url: None,
            region: "us-east-1".to_string(),
            endpoint_url: None,
            visibility_timeout: Duration::from_secs(300),
            wait_time: Duration::from_secs(20),
            receive_error_backoff: Duration::from_secs(5),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Broker variant
    pub kind: BrokerKind,
    /// Handlers running at once
    pub concurrency: usize,
    pub redis: RedisSettings,
    pub sqs: SqsSettings,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Redis,
            concurrency: 5,
            redis: RedisSettings::default(),
            sqs: SqsSettings::default(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> QueueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let num = |key: &str, default: u64| -> QueueResult<u64> {
            match var(key) {
                Some(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| QueueError::config(format!("{} must be a number, got '{}'", key, v))),
                None => Ok(default),
            }
        };

        let defaults = QueueConfig::default();
        let kind = match var("QUEUE_TYPE") {
            Some(v) => v.parse()?,
            None => defaults.kind,
        };

        let concurrency = num("WORKER_CONCURRENCY", defaults.concurrency as u64)? as usize;
        if concurrency == 0 {
            return Err(QueueError::config("WORKER_CONCURRENCY must be at least 1"));
        }

        let redis_defaults = RedisSettings::default();
        let redis = RedisSettings {
            url: var("REDIS_URL").unwrap_or(redis_defaults.url),
            stream_name: var("QUEUE_STREAM").unwrap_or(redis_defaults.stream_name),
            consumer_group: var("QUEUE_CONSUMER_GROUP").unwrap_or(redis_defaults.consumer_group),
            dlq_stream_name: var("QUEUE_DLQ_STREAM").unwrap_or(redis_defaults.dlq_stream_name),
            max_retries: num("QUEUE_MAX_RETRIES", redis_defaults.max_retries as u64)? as u32,
            retry_backoff: Duration::from_secs(num(
                "QUEUE_RETRY_BACKOFF_SECS",
                redis_defaults.retry_backoff.as_secs(),
            )?),
            block_timeout: redis_defaults.block_timeout,
            drain_timeout: Duration::from_secs(num(
                "WORKER_SHUTDOWN_TIMEOUT",
                redis_defaults.drain_timeout.as_secs(),
            )?),
        };

        let sqs_defaults = SqsSettings::default();
        let sqs = SqsSettings {
            queue_url: var("SQS_QUEUE_URL"),
            region: var("SQS_REGION")
                .or_else(|| var("AWS_REGION"))
                .unwrap_or(sqs_defaults.region),
            endpoint_url: var("SQS_ENDPOINT_URL"),
            visibility_timeout: Duration::from_secs(num(
                "SQS_VISIBILITY_TIMEOUT",
                sqs_defaults.visibility_timeout.as_secs(),
            )?),
            wait_time: Duration::from_secs(num(
                "SQS_WAIT_TIME_SECS",
                sqs_defaults.wait_time.as_secs(),
            )?),
            receive_error_backoff: sqs_defaults.receive_error_backoff,
        };

        let config = Self {
            kind,
            concurrency,
            redis,
            sqs,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the settings of the selected variant.
    pub fn validate(&self) -> QueueResult<()> {
        match self.kind {
            BrokerKind::Redis => {
                if self.redis.max_retries == 0 {
                    return Err(QueueError::config("QUEUE_MAX_RETRIES must be at least 1"));
                }
                if self.redis.retry_backoff < MIN_RETRY_BACKOFF {
                    return Err(QueueError::config(format!(
                        "QUEUE_RETRY_BACKOFF_SECS must be at least {}",
                        MIN_RETRY_BACKOFF.as_secs()
                    )));
                }
            }
            BrokerKind::Sqs => {
                if self.sqs.queue_url.is_none() {
                    return Err(QueueError::config(
                        "SQS_QUEUE_URL is required when QUEUE_TYPE=sqs",
                    ));
                }
                // SQS caps long polling at 20 seconds.
                if self.sqs.wait_time > Duration::from_secs(20) {
                    return Err(QueueError::config("SQS_WAIT_TIME_SECS must be at most 20"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = QueueConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.sqs.visibility_timeout, Duration::from_secs(300));
        assert_eq!(config.sqs.wait_time, Duration::from_secs(20));
    }

    #[test]
    fn test_sqs_requires_url() {
        let err = QueueConfig::from_lookup(lookup(&[("QUEUE_TYPE", "sqs")])).unwrap_err();
        assert!(err.is_config());

        let config = QueueConfig::from_lookup(lookup(&[
            ("QUEUE_TYPE", "SQS"),
            ("SQS_QUEUE_URL", "https://sqs.us-east-1.amazonaws.com/123/videos"),
            ("SQS_REGION", "us-east-2"),
            ("WORKER_CONCURRENCY", "8"),
        ]))
        .unwrap();
        assert_eq!(config.kind, BrokerKind::Sqs);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.sqs.region, "us-east-2");
    }

    #[test]
    fn test_unknown_type() {
        let err = QueueConfig::from_lookup(lookup(&[("QUEUE_TYPE", "kafka")])).unwrap_err();
        assert!(err.to_string().contains("kafka"));
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(QueueConfig::from_lookup(lookup(&[("WORKER_CONCURRENCY", "many")])).is_err());
        assert!(QueueConfig::from_lookup(lookup(&[("WORKER_CONCURRENCY", "0")])).is_err());
        assert!(QueueConfig::from_lookup(lookup(&[("QUEUE_MAX_RETRIES", "0")])).is_err());
    }

    #[test]
    fn test_retry_backoff_floor() {
        for secs in ["0", "2"] {
            let err = QueueConfig::from_lookup(lookup(&[("QUEUE_RETRY_BACKOFF_SECS", secs)]))
                .unwrap_err();
            assert!(err.is_config());
            assert!(err.to_string().contains("QUEUE_RETRY_BACKOFF_SECS"));
        }
        let config =
            QueueConfig::from_lookup(lookup(&[("QUEUE_RETRY_BACKOFF_SECS", "3")])).unwrap();
        assert_eq!(config.redis.retry_backoff, MIN_RETRY_BACKOFF);

        // The floor only concerns the Redis variant.
        let sqs = QueueConfig::from_lookup(lookup(&[
            ("QUEUE_TYPE", "sqs"),
            ("SQS_QUEUE_URL", "https://sqs.us-east-1.amazonaws.com/123/videos"),
            ("QUEUE_RETRY_BACKOFF_SECS", "0"),
        ]));
        assert!(sqs.is_ok());
    }

    #[test]
    fn test_redis_overrides() {
        let config = QueueConfig::from_lookup(lookup(&[
            ("REDIS_URL", "redis://cache:6379/2"),
            ("QUEUE_MAX_RETRIES", "5"),
            ("QUEUE_RETRY_BACKOFF_SECS", "10"),
        ]))
        .unwrap();
        assert_eq!(config.redis.url, "redis://cache:6379/2");
        assert_eq!(config.redis.max_retries, 5);
        assert_eq!(config.redis.retry_backoff, Duration::from_secs(10));
    }
}
