//! Processing stages of a single task attempt.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a task attempt currently is.
///
/// Attempts move through these in declaration order; `Trimming` is skipped
/// when the source is short enough. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Received,
    Downloading,
    Probing,
    Trimming,
    StrippingAudio,
    Transcoding,
    Uploading,
    Finalizing,
    Done,
    Failed,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Received => "received",
            ProcessingStage::Downloading => "downloading",
            ProcessingStage::Probing => "probing",
            ProcessingStage::Trimming => "trimming",
            ProcessingStage::StrippingAudio => "stripping_audio",
            ProcessingStage::Transcoding => "transcoding",
            ProcessingStage::Uploading => "uploading",
            ProcessingStage::Finalizing => "finalizing",
            ProcessingStage::Done => "done",
            ProcessingStage::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
