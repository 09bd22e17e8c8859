//! Video record models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Logical storage prefix for processed artifacts.
pub const PROCESSED_PREFIX: &str = "processed";

/// Unique identifier for an uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as a single file-name component.
    ///
    /// ASCII letters, digits and `-` pass through; every other byte
    /// (including `_`) becomes `_XX` in hex, so distinct ids never share a
    /// segment and separators never split one.
    pub fn path_segment(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        for b in self.0.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' {
                out.push(b as char);
            } else {
                out.push_str(&format!("_{:02X}", b));
            }
        }
        out
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Video processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Original file stored, waiting for a worker
    #[default]
    Uploaded,
    /// A worker attempt is running
    Processing,
    /// Processed artifact stored and referenced by the record
    Processed,
    /// The last attempt failed (a new delivery may retry)
    Failed,
}

impl VideoStatus {
    pub const ALL: [VideoStatus; 4] = [
        VideoStatus::Uploaded,
        VideoStatus::Processing,
        VideoStatus::Processed,
        VideoStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploaded => "uploaded",
            VideoStatus::Processing => "processing",
            VideoStatus::Processed => "processed",
            VideoStatus::Failed => "failed",
        }
    }

    /// Whether a record in this status may move to `next`.
    ///
    /// Transitions only move forward, except that a failed record may be
    /// picked up again by a fresh delivery. Re-entering `processing` is
    /// allowed so redelivered attempts stay idempotent.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        use VideoStatus::*;
        match (self, next) {
            (Uploaded, Processing) => true,
            (Processing, Processing | Processed | Failed) => true,
            (Failed, Processing | Failed) => true,
            // Last-write-wins re-runs of an already processed video.
            (Processed, Processing) => true,
            (Uploaded, Failed) => true,
            _ => false,
        }
    }

    /// Statuses a record may be in for an update to `next` to apply.
    pub fn sources_of(next: VideoStatus) -> Vec<VideoStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(VideoStatus::Uploaded),
            "processing" => Ok(VideoStatus::Processing),
            "processed" => Ok(VideoStatus::Processed),
            "failed" => Ok(VideoStatus::Failed),
            other => Err(format!("unknown video status: {other}")),
        }
    }
}

/// The parts of a stored video row this pipeline reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    /// Video ID
    pub id: VideoId,
    /// Storage-relative path of the uploaded original
    pub original_location: String,
    /// Storage-relative path of the processed artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_location: Option<String>,
    /// Processing status
    #[serde(default)]
    pub status: VideoStatus,
    /// When the processed artifact was recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// Short reason written when an attempt fails
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl VideoRecord {
    /// Create a freshly uploaded record.
    pub fn uploaded(id: VideoId, original_location: impl Into<String>) -> Self {
        Self {
            id,
            original_location: original_location.into(),
            processed_location: None,
            status: VideoStatus::Uploaded,
            processed_at: None,
            failure_reason: None,
        }
    }
}

/// Canonical logical path of the processed artifact for a video.
///
/// Re-runs for the same video always write to this path (last write wins).
pub fn processed_video_path(video_id: &VideoId) -> String {
    format!(
        "{}/{}_processed.mp4",
        PROCESSED_PREFIX,
        video_id.path_segment()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_strings() {
        for status in VideoStatus::ALL {
            assert_eq!(status.as_str().parse::<VideoStatus>().unwrap(), status);
        }
        assert!("archived".parse::<VideoStatus>().is_err());
    }

    #[test]
    fn test_status_transitions() {
        assert!(VideoStatus::Uploaded.can_transition_to(VideoStatus::Processing));
        assert!(VideoStatus::Processing.can_transition_to(VideoStatus::Processed));
        assert!(VideoStatus::Failed.can_transition_to(VideoStatus::Processing));
        assert!(!VideoStatus::Uploaded.can_transition_to(VideoStatus::Processed));
        assert!(!VideoStatus::Processed.can_transition_to(VideoStatus::Uploaded));
        assert!(!VideoStatus::Failed.can_transition_to(VideoStatus::Processed));

        assert_eq!(
            VideoStatus::sources_of(VideoStatus::Processed),
            vec![VideoStatus::Processing]
        );
        assert!(!VideoStatus::sources_of(VideoStatus::Failed).contains(&VideoStatus::Processed));
        assert_eq!(VideoStatus::sources_of(VideoStatus::Processing).len(), 4);
    }

    #[test]
    fn test_processed_path_is_deterministic() {
        let id = VideoId::from("V1");
        assert_eq!(processed_video_path(&id), "processed/V1_processed.mp4");
        assert_eq!(processed_video_path(&id), processed_video_path(&id));

        let uuid = VideoId::from("0b6f8f9e-3c1d-4c5e-9a43-2f1d7c3b9e10");
        assert_eq!(
            processed_video_path(&uuid),
            "processed/0b6f8f9e-3c1d-4c5e-9a43-2f1d7c3b9e10_processed.mp4"
        );
    }

    #[test]
    fn test_processed_path_keeps_ids_apart() {
        let ids = ["team-a/clip", "team-b/clip", "team-a_2Fclip", "team-a_clip", "../clip"];
        let paths: std::collections::HashSet<String> = ids
            .iter()
            .map(|id| processed_video_path(&VideoId::from(*id)))
            .collect();
        assert_eq!(paths.len(), ids.len());
        for path in &paths {
            let name = path.strip_prefix("processed/").unwrap();
            assert!(!name.contains('/'));
            assert!(!name.contains(".."));
        }
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&VideoStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}
