//! Video processing task handler.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reelpipe_media::{
    FfmpegToolkit, MediaToolkit, PipelineReport, ScratchSpace, TranscodePipeline,
};
use reelpipe_models::{
    processed_video_path, ProcessingStage, VideoId, VideoProcessingTask, VideoRecord,
    TASK_TYPE_VIDEO_PROCESSING,
};
use reelpipe_queue::{BoxError, TaskHandler};
use reelpipe_storage::StorageBackend;
use tracing::Instrument;

use crate::error::{WorkerError, WorkerResult};
use crate::gateway::VideoRecordGateway;
use crate::inflight::InFlightVideos;
use crate::logging::JobLogger;
use crate::metrics;

/// Failure reason written to the record for an attempt that stopped in
/// `stage`.
pub fn failure_reason(stage: ProcessingStage) -> &'static str {
    match stage {
        ProcessingStage::Received => "failed to prepare processing",
        ProcessingStage::Downloading => "failed to download video from storage",
        ProcessingStage::Probing => "failed to get video duration",
        ProcessingStage::Trimming => "failed to trim video",
        ProcessingStage::StrippingAudio => "failed to remove audio",
        ProcessingStage::Transcoding => "failed to convert video",
        ProcessingStage::Uploading => "failed to upload processed video to storage",
        ProcessingStage::Finalizing => "failed to record processed video",
        ProcessingStage::Done | ProcessingStage::Failed => "processing failed",
    }
}

/// Result of a successful attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingOutcome {
    /// Logical path the artifact was stored at
    pub processed_path: String,
    pub report: PipelineReport,
}

/// Drives one video from the uploaded original to the stored artifact.
pub struct VideoProcessor<T = FfmpegToolkit> {
    storage: Arc<dyn StorageBackend>,
    records: Arc<dyn VideoRecordGateway>,
    pipeline: TranscodePipeline<T>,
    work_dir: PathBuf,
    in_flight: InFlightVideos,
}

impl<T: MediaToolkit> VideoProcessor<T> {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        records: Arc<dyn VideoRecordGateway>,
        pipeline: TranscodePipeline<T>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage,
            records,
            pipeline,
            work_dir: work_dir.into(),
            in_flight: InFlightVideos::new(),
        }
    }

    pub fn in_flight(&self) -> &InFlightVideos {
        &self.in_flight
    }

    /// Process one task. The record ends up `processed`, or `failed` with a
    /// short reason (best effort) and the error is returned.
    pub async fn process(&self, task: &VideoProcessingTask) -> WorkerResult<ProcessingOutcome> {
        let video_id = &task.video_id;
        let logger = JobLogger::new(video_id, "video_processing");

        let Some(_guard) = self.in_flight.try_acquire(video_id) else {
            logger.log_warning("another attempt is running in this worker, deferring");
            metrics::record_task_rejected_busy();
            return Err(WorkerError::Busy(video_id.to_string()));
        };

        let span = logger.create_span();
        self.process_guarded(video_id, &logger).instrument(span).await
    }

    async fn process_guarded(
        &self,
        video_id: &VideoId,
        logger: &JobLogger,
    ) -> WorkerResult<ProcessingOutcome> {
        let started = Instant::now();
        logger.log_start("processing video");
        logger.log_stage(ProcessingStage::Received);
        metrics::record_task_started();

        self.records.mark_processing(video_id).await?;

        let record = match self.records.get_by_id(video_id).await? {
            Some(record) => record,
            None => {
                self.mark_failed(video_id, "video not found", logger).await;
                metrics::record_task_failed(
                    ProcessingStage::Received.as_str(),
                    "not_found",
                    started.elapsed(),
                );
                return Err(WorkerError::NotFound(video_id.to_string()));
            }
        };

        let mut stage = ProcessingStage::Received;
        let result = self.run_stages(&record, &mut stage, logger).await;

        match result {
            Ok(outcome) => {
                logger.log_stage(ProcessingStage::Done);
                logger.log_completion(&format!(
                    "stored {} (strategy={}, watermarked={}, trimmed={})",
                    outcome.processed_path,
                    outcome.report.strategy,
                    outcome.report.watermarked,
                    outcome.report.trimmed
                ));
                metrics::record_task_completed(
                    outcome.report.strategy.as_str(),
                    outcome.report.watermarked,
                    started.elapsed(),
                );
                Ok(outcome)
            }
            Err(e) => {
                logger.log_stage(ProcessingStage::Failed);
                logger.log_error(
                    &format!("{} during {}: {}", e.kind().as_str(), stage, e),
                    e.is_retryable(),
                );
                self.mark_failed(video_id, failure_reason(stage), logger).await;
                metrics::record_task_failed(stage.as_str(), e.kind().as_str(), started.elapsed());
                Err(e)
            }
        }
    }

    /// Everything between fetching the record and finalizing it. `stage`
    /// tracks the stage the attempt is in.
    async fn run_stages(
        &self,
        record: &VideoRecord,
        stage: &mut ProcessingStage,
        logger: &JobLogger,
    ) -> WorkerResult<ProcessingOutcome> {
        let scratch = ScratchSpace::new_in(&self.work_dir, record.id.as_str())?;

        *stage = ProcessingStage::Downloading;
        logger.log_stage(*stage);
        let source = scratch.artifact(&source_file_name(&record.original_location));
        self.storage
            .download_to_local(&record.original_location, &source)
            .await?;

        let report = {
            let on_stage = |next: ProcessingStage| {
                *stage = next;
                logger.log_stage(next);
            };
            self.pipeline.run(&source, &scratch, on_stage).await
        };
        let report = report?;

        *stage = ProcessingStage::Uploading;
        logger.log_stage(*stage);
        let processed_path = processed_video_path(&record.id);
        self.storage
            .upload_from_local(&report.output, &processed_path)
            .await?;

        *stage = ProcessingStage::Finalizing;
        logger.log_stage(*stage);
        self.records
            .mark_processed(&record.id, &processed_path)
            .await?;

        scratch.close();
        Ok(ProcessingOutcome {
            processed_path,
            report,
        })
    }

    /// Failures to record the failure are only logged.
    async fn mark_failed(&self, video_id: &VideoId, reason: &str, logger: &JobLogger) {
        if let Err(e) = self.records.mark_failed(video_id, reason).await {
            logger.log_warning(&format!("could not mark video failed ({}): {}", reason, e));
        }
    }
}

/// Local file name for the downloaded original, keeping its extension.
fn source_file_name(original_location: &str) -> String {
    let extension = Path::new(original_location)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .unwrap_or("mp4");
    format!("source.{}", extension)
}

#[async_trait]
impl<T: MediaToolkit + 'static> TaskHandler for VideoProcessor<T> {
    async fn handle(&self, task_type: &str, payload: &[u8]) -> Result<(), BoxError> {
        if task_type != TASK_TYPE_VIDEO_PROCESSING {
            return Err(Box::new(WorkerError::UnknownTaskType(task_type.to_string())));
        }
        let task = VideoProcessingTask::from_payload(payload)
            .map_err(|e| WorkerError::InvalidPayload(e.to_string()))?;

        self.process(&task).await?;
        Ok(())
    }
}
