//! Lease-based broker.
//!
//! A received message stays invisible to other consumers for the visibility
//! timeout. Handling it successfully deletes it; a failure leaves it alone
//! so it reappears once the lease runs out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reelpipe_models::TASK_TYPE_VIDEO_PROCESSING;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::broker::{wait_for_true, BrokerClient, TaskHandler};
use crate::config::SqsSettings;
use crate::error::{QueueError, QueueResult};

/// Message attribute holding the task type.
pub const TASK_TYPE_ATTRIBUTE: &str = "TaskType";
/// SQS returns at most ten messages per receive call.
const MAX_RECEIVE_BATCH: usize = 10;

/// A message received under a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedMessage {
    pub message_id: String,
    /// Handle that deletes this particular delivery.
    pub receipt_handle: String,
    pub task_type: Option<String>,
    pub body: Vec<u8>,
}

impl LeasedMessage {
    /// Task type, falling back to video processing when the attribute is
    /// missing or empty.
    pub fn task_type_or_default(&self) -> &str {
        self.task_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(TASK_TYPE_VIDEO_PROCESSING)
    }
}

/// The wire side of a leasing queue.
#[async_trait]
pub trait LeaseTransport: Send + Sync + 'static {
    fn transport_name(&self) -> &'static str;

    /// Send a message and return its id.
    async fn send(&self, task_type: &str, body: &[u8]) -> QueueResult<String>;

    /// Wait up to `wait` for at most `max` messages, leasing each for
    /// `visibility`. An empty result is not an error.
    async fn receive(
        &self,
        max: usize,
        wait: Duration,
        visibility: Duration,
    ) -> QueueResult<Vec<LeasedMessage>>;

    /// Delete a delivered message.
    async fn delete(&self, receipt_handle: &str) -> QueueResult<()>;

    /// Messages available for delivery. May lag behind reality.
    async fn approximate_depth(&self) -> QueueResult<u64>;
}

/// Broker over a [`LeaseTransport`].
pub struct LeasingBroker<T> {
    transport: Arc<T>,
    settings: SqsSettings,
    concurrency: usize,
    closed: watch::Sender<bool>,
}

/// The production leasing broker.
pub type SqsBroker = LeasingBroker<SqsTransport>;

impl<T: LeaseTransport> LeasingBroker<T> {
    pub fn new(transport: T, settings: SqsSettings, concurrency: usize) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            transport: Arc::new(transport),
            settings,
            concurrency: concurrency.max(1),
            closed,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn receive_batch(&self) -> usize {
        self.concurrency.min(MAX_RECEIVE_BATCH)
    }
}

async fn process_message<T: LeaseTransport>(
    transport: &T,
    handler: &dyn TaskHandler,
    message: LeasedMessage,
) {
    let task_type = message.task_type_or_default();
    debug!(message_id = %message.message_id, task_type = %task_type, "Handling message");

    match handler.handle(task_type, &message.body).await {
        Ok(()) => {
            if let Err(e) = transport.delete(&message.receipt_handle).await {
                error!(
                    message_id = %message.message_id,
                    "Failed to delete handled message: {}", e
                );
            }
        }
        Err(e) => {
            warn!(
                message_id = %message.message_id,
                task_type = %task_type,
                "Task failed, message will reappear after its visibility timeout: {}", e
            );
        }
    }
}

#[async_trait]
impl<T: LeaseTransport> BrokerClient for LeasingBroker<T> {
    fn broker_name(&self) -> &'static str {
        self.transport.transport_name()
    }

    async fn enqueue(&self, task_type: &str, payload: &[u8]) -> QueueResult<()> {
        if *self.closed.borrow() {
            return Err(QueueError::Closed);
        }
        let message_id = self.transport.send(task_type, payload).await?;
        info!(task_type = %task_type, message_id = %message_id, "Enqueued task");
        Ok(())
    }

    async fn start_worker(
        &self,
        handler: Arc<dyn TaskHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> QueueResult<()> {
        let mut closed = self.closed.subscribe();
        let (tx, rx) = mpsc::channel::<LeasedMessage>(self.concurrency);
        let rx = Arc::new(Mutex::new(rx));

        info!(
            "Starting {} worker with concurrency {}",
            self.transport.transport_name(),
            self.concurrency
        );

        let mut workers = Vec::with_capacity(self.concurrency);
        for _ in 0..self.concurrency {
            let rx = Arc::clone(&rx);
            let transport = Arc::clone(&self.transport);
            let handler = Arc::clone(&handler);
            workers.push(tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(message) = next else { break };
                    process_message(transport.as_ref(), handler.as_ref(), message).await;
                }
            }));
        }

        'poll: loop {
            if *shutdown.borrow() || *closed.borrow() {
                break;
            }

            let received = tokio::select! {
                result = self.transport.receive(
                    self.receive_batch(),
                    self.settings.wait_time,
                    self.settings.visibility_timeout,
                ) => result,
                _ = wait_for_true(&mut shutdown) => break,
                _ = wait_for_true(&mut closed) => break,
            };

            match received {
                Ok(messages) => {
                    for message in messages {
                        if tx.send(message).await.is_err() {
                            break 'poll;
                        }
                    }
                }
                Err(e) => {
                    error!("Error receiving messages: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.receive_error_backoff) => {}
                        _ = wait_for_true(&mut shutdown) => break,
                        _ = wait_for_true(&mut closed) => break,
                    }
                }
            }
        }

        info!("Stopping {} worker, waiting for in-flight tasks...", self.transport.transport_name());
        drop(tx);
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("Handler task panicked: {}", e);
            }
        }

        info!("{} worker stopped", self.transport.transport_name());
        Ok(())
    }

    async fn close(&self) -> QueueResult<()> {
        self.closed.send_replace(true);
        info!("{} broker closed", self.transport.transport_name());
        Ok(())
    }

    async fn queue_depth(&self) -> QueueResult<u64> {
        self.transport.approximate_depth().await
    }
}

pub use sqs::SqsTransport;

mod sqs {
    use std::time::Duration;

    use async_trait::async_trait;
    use aws_config::BehaviorVersion;
    use aws_sdk_sqs::config::Region;
    use aws_sdk_sqs::types::{MessageAttributeValue, QueueAttributeName};
    use aws_sdk_sqs::Client;
    use tracing::{info, warn};

    use super::{LeaseTransport, LeasedMessage, TASK_TYPE_ATTRIBUTE};
    use crate::config::SqsSettings;
    use crate::error::{QueueError, QueueResult};

    /// Amazon SQS transport.
    #[derive(Clone)]
    pub struct SqsTransport {
        client: Client,
        queue_url: String,
    }

    impl SqsTransport {
        pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
            Self {
                client,
                queue_url: queue_url.into(),
            }
        }

        /// Build a client from the default credential chain.
        pub async fn connect(settings: &SqsSettings) -> QueueResult<Self> {
            let queue_url = settings.queue_url.clone().ok_or_else(|| {
                QueueError::config("SQS_QUEUE_URL is required when QUEUE_TYPE=sqs")
            })?;

            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(settings.region.clone()))
                .load()
                .await;

            let mut builder = aws_sdk_sqs::config::Builder::from(&shared);
            if let Some(endpoint) = &settings.endpoint_url {
                builder = builder.endpoint_url(endpoint);
            }

            info!(queue_url = %queue_url, region = %settings.region, "Initializing SQS transport");
            Ok(Self::new(Client::from_conf(builder.build()), queue_url))
        }

        pub fn queue_url(&self) -> &str {
            &self.queue_url
        }
    }

    #[async_trait]
    impl LeaseTransport for SqsTransport {
        fn transport_name(&self) -> &'static str {
            "sqs"
        }

        async fn send(&self, task_type: &str, body: &[u8]) -> QueueResult<String> {
            let body = std::str::from_utf8(body).map_err(|e| {
                QueueError::Serialization(format!("message body must be UTF-8: {}", e))
            })?;
            let attribute = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(task_type)
                .build()
                .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

            let output = self
                .client
                .send_message()
                .queue_url(&self.queue_url)
                .message_body(body)
                .message_attributes(TASK_TYPE_ATTRIBUTE, attribute)
                .send()
                .await
                .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

            Ok(output.message_id().unwrap_or_default().to_string())
        }

        async fn receive(
            &self,
            max: usize,
            wait: Duration,
            visibility: Duration,
        ) -> QueueResult<Vec<LeasedMessage>> {
            let response = self
                .client
                .receive_message()
                .queue_url(&self.queue_url)
                .max_number_of_messages(max.clamp(1, 10) as i32)
                .wait_time_seconds(wait.as_secs().min(20) as i32)
                .visibility_timeout(visibility.as_secs() as i32)
                .message_attribute_names("All")
                .send()
                .await
                .map_err(|e| QueueError::receive_failed(e.to_string()))?;

            let mut leased = Vec::new();
            for message in response.messages.unwrap_or_default() {
                let Some(receipt_handle) = message.receipt_handle() else {
                    warn!("Received message without receipt handle, skipping");
                    continue;
                };
                let task_type = message
                    .message_attributes()
                    .and_then(|attrs| attrs.get(TASK_TYPE_ATTRIBUTE))
                    .and_then(|value| value.string_value())
                    .map(str::to_string);

                leased.push(LeasedMessage {
                    message_id: message.message_id().unwrap_or_default().to_string(),
                    receipt_handle: receipt_handle.to_string(),
                    task_type,
                    body: message.body().unwrap_or_default().as_bytes().to_vec(),
                });
            }
            Ok(leased)
        }

        async fn delete(&self, receipt_handle: &str) -> QueueResult<()> {
            self.client
                .delete_message()
                .queue_url(&self.queue_url)
                .receipt_handle(receipt_handle)
                .send()
                .await
                .map_err(|e| QueueError::ack_failed(e.to_string()))?;
            Ok(())
        }

        async fn approximate_depth(&self) -> QueueResult<u64> {
            let response = self
                .client
                .get_queue_attributes()
                .queue_url(&self.queue_url)
                .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
                .send()
                .await
                .map_err(|e| QueueError::receive_failed(e.to_string()))?;

            Ok(response
                .attributes()
                .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0))
        }
    }
}

/// In-process leasing transport for tests and local runs.
pub mod memory {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use tokio::time::Instant;
    use uuid::Uuid;

    use super::{LeaseTransport, LeasedMessage};
    use crate::error::{QueueError, QueueResult};

    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    #[derive(Debug)]
    struct StoredMessage {
        id: String,
        task_type: Option<String>,
        body: Vec<u8>,
        visible_at: Instant,
        receipt_handle: Option<String>,
        receive_count: u32,
    }

    /// Queue held in memory with lease semantics on the tokio clock.
    #[derive(Debug, Default)]
    pub struct MemoryTransport {
        messages: Mutex<Vec<StoredMessage>>,
    }

    impl MemoryTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a message, optionally without a task type attribute.
        pub async fn push_raw(&self, task_type: Option<&str>, body: &[u8]) -> String {
            let id = Uuid::new_v4().to_string();
            self.messages.lock().await.push(StoredMessage {
                id: id.clone(),
                task_type: task_type.map(str::to_string),
                body: body.to_vec(),
                visible_at: Instant::now(),
                receipt_handle: None,
                receive_count: 0,
            });
            id
        }

        /// Messages not yet deleted, leased or not.
        pub async fn len(&self) -> usize {
            self.messages.lock().await.len()
        }

        pub async fn is_empty(&self) -> bool {
            self.len().await == 0
        }

        /// How often a message has been delivered.
        pub async fn receive_count(&self, message_id: &str) -> Option<u32> {
            self.messages
                .lock()
                .await
                .iter()
                .find(|m| m.id == message_id)
                .map(|m| m.receive_count)
        }

        async fn try_receive(&self, max: usize, visibility: Duration) -> Vec<LeasedMessage> {
            let now = Instant::now();
            let mut messages = self.messages.lock().await;
            messages
                .iter_mut()
                .filter(|m| m.visible_at <= now)
                .take(max)
                .map(|m| {
                    let receipt_handle = Uuid::new_v4().to_string();
                    m.visible_at = now + visibility;
                    m.receipt_handle = Some(receipt_handle.clone());
                    m.receive_count += 1;
                    LeasedMessage {
                        message_id: m.id.clone(),
                        receipt_handle,
                        task_type: m.task_type.clone(),
                        body: m.body.clone(),
                    }
                })
                .collect()
        }
    }

    #[async_trait]
    impl LeaseTransport for MemoryTransport {
        fn transport_name(&self) -> &'static str {
            "memory"
        }

        async fn send(&self, task_type: &str, body: &[u8]) -> QueueResult<String> {
            Ok(self.push_raw(Some(task_type), body).await)
        }

        async fn receive(
            &self,
            max: usize,
            wait: Duration,
            visibility: Duration,
        ) -> QueueResult<Vec<LeasedMessage>> {
            let deadline = Instant::now() + wait;
            loop {
                let received = self.try_receive(max, visibility).await;
                let now = Instant::now();
                if !received.is_empty() || now >= deadline {
                    return Ok(received);
                }
                tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
            }
        }

        async fn delete(&self, receipt_handle: &str) -> QueueResult<()> {
            let mut messages = self.messages.lock().await;
            let position = messages
                .iter()
                .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
                .ok_or_else(|| {
                    QueueError::ack_failed(format!("receipt handle is not current: {}", receipt_handle))
                })?;
            messages.remove(position);
            Ok(())
        }

        async fn approximate_depth(&self) -> QueueResult<u64> {
            let now = Instant::now();
            Ok(self
                .messages
                .lock()
                .await
                .iter()
                .filter(|m| m.visible_at <= now)
                .count() as u64)
        }
    }
}
