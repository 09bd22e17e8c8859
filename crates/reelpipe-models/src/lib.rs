//! Shared data models for the reelpipe processing pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Video processing tasks (the broker payload)
//! - Video records and their processing status
//! - Output format and encoding profile for transcoding
//! - Processing stages of a task attempt

pub mod encoding;
pub mod stage;
pub mod task;
pub mod video;

// Re-export common types
pub use encoding::{EncodingProfile, OutputFormat, OutputFormatError, WATERMARK_PADDING};
pub use stage::ProcessingStage;
pub use task::{VideoProcessingTask, TASK_TYPE_VIDEO_PROCESSING};
pub use video::{processed_video_path, VideoId, VideoRecord, VideoStatus};
