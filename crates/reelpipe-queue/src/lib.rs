//! Task brokers for the reelpipe worker.
//!
//! This crate provides:
//! - The `BrokerClient` and `TaskHandler` traits
//! - A Redis Streams broker with retries and a dead-letter stream
//! - A lease-based broker over SQS (and an in-memory transport)
//! - `TaskDispatcher` for enqueueing processing tasks
//! - Broker selection from the environment

pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod factory;
pub mod leasing;
pub mod stream;

pub use broker::{BoxError, BrokerClient, FnHandler, TaskHandler};
pub use config::{BrokerKind, QueueConfig, RedisSettings, SqsSettings, MIN_RETRY_BACKOFF};
pub use dispatcher::TaskDispatcher;
pub use error::{QueueError, QueueResult};
pub use factory::connect_broker;
pub use leasing::memory::MemoryTransport;
pub use leasing::{LeaseTransport, LeasedMessage, LeasingBroker, SqsBroker, SqsTransport};
pub use stream::{RedisBroker, RetryDecision};
