//! Structured task logging utilities.
//!
//! Every event carries the video id and operation so one attempt can be
//! followed across stages.

use reelpipe_models::{ProcessingStage, VideoId};
use tracing::{error, info, warn, Span};

/// Logs the lifecycle of one task attempt.
#[derive(Debug, Clone)]
pub struct JobLogger {
    video_id: String,
    operation: String,
}

impl JobLogger {
    /// Create a logger for a video and operation.
    pub fn new(video_id: &VideoId, operation: &str) -> Self {
        Self {
            video_id: video_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Task started: {}", message
        );
    }

    /// Log entry into a processing stage.
    pub fn log_stage(&self, stage: ProcessingStage) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            stage = %stage,
            "Task stage: {}", stage
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Task progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Task warning: {}", message
        );
    }

    /// `retryable` tells operators whether a redelivery can succeed as is.
    pub fn log_error(&self, message: &str, retryable: bool) {
        error!(
            video_id = %self.video_id,
            operation = %self.operation,
            retryable = retryable,
            "Task error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Task completed: {}", message
        );
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span to attach further structured fields to.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "task",
            video_id = %self.video_id,
            operation = %self.operation
        )
    }
}
