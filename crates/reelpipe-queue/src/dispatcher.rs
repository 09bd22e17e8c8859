//! Task dispatcher used by the upload flow.

use std::sync::Arc;

use reelpipe_models::{VideoId, VideoProcessingTask};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::broker::BrokerClient;
use crate::error::QueueResult;

/// Enqueues processing tasks on whichever broker is configured.
#[derive(Clone)]
pub struct TaskDispatcher {
    client: Arc<dyn BrokerClient>,
}

impl TaskDispatcher {
    pub fn new(client: Arc<dyn BrokerClient>) -> Self {
        Self { client }
    }

    /// Enqueue a processing task for an uploaded video.
    pub async fn enqueue_video_processing(&self, video_id: &VideoId) -> QueueResult<()> {
        let task = VideoProcessingTask::new(video_id.clone());
        let payload = task.to_payload()?;
        self.client.enqueue(task.task_type(), &payload).await?;
        info!(video_id = %video_id, broker = self.client.broker_name(), "Dispatched video processing task");
        Ok(())
    }

    /// Enqueue in the background. Failures are logged and never reach the
    /// caller; the video record stays in `uploaded`.
    pub fn dispatch_video_processing(&self, video_id: VideoId) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.enqueue_video_processing(&video_id).await {
                error!(video_id = %video_id, "Failed to enqueue video processing task: {}", e);
            }
        })
    }

    /// Tasks waiting for a first delivery.
    pub async fn queue_depth(&self) -> QueueResult<u64> {
        self.client.queue_depth().await
    }

    pub async fn close(&self) -> QueueResult<()> {
        self.client.close().await
    }

    /// The underlying broker, for starting workers.
    pub fn client(&self) -> Arc<dyn BrokerClient> {
        Arc::clone(&self.client)
    }
}
