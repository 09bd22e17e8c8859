//! Broker client and task handler traits.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::QueueResult;

/// Error type returned by task handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one delivered task.
///
/// Returning `Ok` acknowledges the task. Returning `Err` leaves redelivery
/// to the broker (see [`BrokerClient`] for each variant's retry model).
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task_type: &str, payload: &[u8]) -> Result<(), BoxError>;
}

/// Adapts an async closure into a [`TaskHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(String, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    async fn handle(&self, task_type: &str, payload: &[u8]) -> Result<(), BoxError> {
        (self.0)(task_type.to_string(), payload.to_vec()).await
    }
}

/// A task broker.
///
/// Two delivery models sit behind this trait:
///
/// - **Broker-managed retries** ([`RedisBroker`](crate::RedisBroker)): the
///   broker counts failed attempts per message, redelivers after a backoff
///   and moves the message to a dead-letter stream once the retry limit is
///   reached.
/// - **Lease-based redelivery** ([`LeasingBroker`](crate::LeasingBroker)):
///   a received message is hidden for the visibility timeout. Success
///   deletes it; on failure it is left alone and reappears when the lease
///   expires. There is no retry counter or dead-lettering on the client side.
///
/// Either way delivery is at-least-once, so handlers must be idempotent.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Short name for logs.
    fn broker_name(&self) -> &'static str;

    /// Submit a task.
    async fn enqueue(&self, task_type: &str, payload: &[u8]) -> QueueResult<()>;

    /// Consume tasks with `handler` until `shutdown` turns true or the broker
    /// is closed. In-flight handlers are allowed to finish before returning.
    async fn start_worker(
        &self,
        handler: Arc<dyn TaskHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> QueueResult<()>;

    /// Stop consuming and release resources.
    async fn close(&self) -> QueueResult<()>;

    /// Number of tasks waiting for a first delivery (approximate for SQS).
    async fn queue_depth(&self) -> QueueResult<u64>;
}

/// Resolves once `rx` reads true. Never resolves if the sender is dropped
/// while false.
pub(crate) async fn wait_for_true(rx: &mut watch::Receiver<bool>) {
    let sender_gone = rx.wait_for(|v| *v).await.is_err();
    if sender_gone {
        std::future::pending::<()>().await;
    }
}
