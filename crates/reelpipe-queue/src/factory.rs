//! Broker construction from configuration.

use std::sync::Arc;

use tracing::info;

use crate::broker::BrokerClient;
use crate::config::{BrokerKind, QueueConfig};
use crate::error::QueueResult;
use crate::leasing::{LeasingBroker, SqsTransport};
use crate::stream::RedisBroker;

/// Build the broker selected by `config.kind`.
pub async fn connect_broker(config: &QueueConfig) -> QueueResult<Arc<dyn BrokerClient>> {
    config.validate()?;
    info!(broker = %config.kind, concurrency = config.concurrency, "Connecting task broker");

    match config.kind {
        BrokerKind::Redis => {
            let broker = RedisBroker::connect(config.redis.clone(), config.concurrency).await?;
            broker.ensure_group().await?;
            Ok(Arc::new(broker))
        }
        BrokerKind::Sqs => {
            let transport = SqsTransport::connect(&config.sqs).await?;
            Ok(Arc::new(LeasingBroker::new(
                transport,
                config.sqs.clone(),
                config.concurrency,
            )))
        }
    }
}
