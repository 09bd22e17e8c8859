//! Video processing worker.
//!
//! This crate provides:
//! - `VideoProcessor`, the task handler that turns an uploaded video into
//!   a processed artifact
//! - The video record gateway (Postgres and in-memory)
//! - Worker configuration, structured task logging and metrics

pub mod config;
pub mod error;
pub mod gateway;
pub mod inflight;
pub mod logging;
pub mod metrics;
pub mod processor;

pub use config::WorkerConfig;
pub use error::{ErrorKind, WorkerError, WorkerResult};
pub use gateway::{
    GatewayError, GatewayResult, InMemoryVideoRecords, PgVideoRecords, VideoRecordGateway,
};
pub use inflight::{InFlightGuard, InFlightVideos};
pub use logging::JobLogger;
pub use processor::{failure_reason, ProcessingOutcome, VideoProcessor};
