//! FFmpeg CLI wrapper and transcoding pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with stderr capture
//! - FFprobe inspection (duration, resolution, audio presence)
//! - The media step toolkit (trim, strip audio, scale/pad, watermark, copy)
//! - A transcoding pipeline with an explicit fallback chain
//! - Scratch directories that remove every intermediate file on drop

pub mod command;
pub mod error;
pub mod pipeline;
pub mod probe;
pub mod scratch;
pub mod toolkit;
pub mod watermark;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use pipeline::{
    FinishStep, PipelineConfig, PipelineReport, TranscodePipeline, TranscodeStrategy,
    FINISH_CHAIN, TRANSCODE_FALLBACK_CHAIN,
};
pub use probe::{probe_video, VideoInfo};
pub use scratch::ScratchSpace;
pub use toolkit::{FfmpegToolkit, MediaToolkit};
pub use watermark::{WatermarkConfig, DEFAULT_WATERMARK_PATH};
