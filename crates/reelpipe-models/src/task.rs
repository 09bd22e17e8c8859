//! Task payloads carried by the broker.

use serde::{Deserialize, Serialize};

use crate::video::VideoId;

/// Task type tag for video processing.
pub const TASK_TYPE_VIDEO_PROCESSING: &str = "video:processing";

/// Request to process one uploaded video.
///
/// Serialized as `{"video_id": "..."}`. Brokers redeliver the same payload
/// on failure, so handlers must tolerate seeing it more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoProcessingTask {
    /// Video ID
    pub video_id: VideoId,
}

impl VideoProcessingTask {
    pub fn new(video_id: impl Into<VideoId>) -> Self {
        Self {
            video_id: video_id.into(),
        }
    }

    /// Encode as broker payload bytes.
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode from broker payload bytes.
    pub fn from_payload(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    /// Task type tag used when enqueueing.
    pub fn task_type(&self) -> &'static str {
        TASK_TYPE_VIDEO_PROCESSING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_format() {
        let task = VideoProcessingTask::new("abc-123");
        let payload = task.to_payload().unwrap();
        assert_eq!(payload, br#"{"video_id":"abc-123"}"#.to_vec());
    }

    #[test]
    fn test_payload_accepts_extra_fields() {
        let task =
            VideoProcessingTask::from_payload(br#"{"video_id":"v9","attempt":2}"#).unwrap();
        assert_eq!(task.video_id.as_str(), "v9");
    }

    #[test]
    fn test_payload_rejects_missing_id() {
        assert!(VideoProcessingTask::from_payload(br#"{"id":"v9"}"#).is_err());
    }
}
