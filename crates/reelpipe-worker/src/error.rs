//! Worker error types.

use thiserror::Error;

use crate::gateway::GatewayError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid task payload: {0}")]
    InvalidPayload(String),

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Video not found: {0}")]
    NotFound(String),

    #[error("Video {0} is already being processed by this worker")]
    Busy(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] reelpipe_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] reelpipe_media::MediaError),

    #[error("Record store error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Queue error: {0}")]
    Queue(#[from] reelpipe_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classes used for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Io,
    Processing,
    Configuration,
    Busy,
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Io => "io",
            ErrorKind::Processing => "processing",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Busy => "busy",
            ErrorKind::InvalidInput => "invalid_input",
        }
    }
}

impl WorkerError {
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        use reelpipe_media::MediaError;

        match self {
            WorkerError::NotFound(_) => ErrorKind::NotFound,
            WorkerError::Busy(_) => ErrorKind::Busy,
            WorkerError::InvalidPayload(_) | WorkerError::UnknownTaskType(_) => {
                ErrorKind::InvalidInput
            }
            WorkerError::DownloadFailed(_)
            | WorkerError::UploadFailed(_)
            | WorkerError::Gateway(_)
            | WorkerError::Io(_) => ErrorKind::Io,
            WorkerError::ProcessingFailed(_) => ErrorKind::Processing,
            WorkerError::ConfigError(_) => ErrorKind::Configuration,
            WorkerError::Storage(e) if e.is_not_found() => ErrorKind::NotFound,
            WorkerError::Storage(e) if e.is_config() => ErrorKind::Configuration,
            WorkerError::Storage(_) => ErrorKind::Io,
            WorkerError::Media(MediaError::FfmpegNotFound | MediaError::FfprobeNotFound) => {
                ErrorKind::Configuration
            }
            WorkerError::Media(MediaError::Io(_)) => ErrorKind::Io,
            WorkerError::Media(_) => ErrorKind::Processing,
            WorkerError::Queue(e) if e.is_config() => ErrorKind::Configuration,
            WorkerError::Queue(_) => ErrorKind::Io,
        }
    }

    /// Check if a later delivery could succeed without outside changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Io | ErrorKind::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelpipe_media::MediaError;
    use reelpipe_storage::StorageError;

    #[test]
    fn test_kind_classification() {
        assert_eq!(WorkerError::NotFound("v".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            WorkerError::from(StorageError::NotFound("uploads/v.mp4".into())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            WorkerError::from(MediaError::ffmpeg_failed("exit 1", None, Some(1))).kind(),
            ErrorKind::Processing
        );
        assert_eq!(
            WorkerError::from(MediaError::FfmpegNotFound).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            WorkerError::from(std::io::Error::other("disk full")).kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn test_retryable() {
        assert!(WorkerError::Busy("v".into()).is_retryable());
        assert!(WorkerError::download_failed("timeout").is_retryable());
        assert!(!WorkerError::InvalidPayload("not json".into()).is_retryable());
        assert!(!WorkerError::NotFound("v".into()).is_retryable());
        assert!(!WorkerError::processing_failed("bad codec").is_retryable());
    }
}
