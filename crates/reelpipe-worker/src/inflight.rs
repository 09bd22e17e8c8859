//! In-process registry of videos currently being processed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use reelpipe_models::VideoId;

/// Video ids with an attempt running in this process.
///
/// Two deliveries of the same id never run side by side here; the second
/// one is turned away and left to the broker's redelivery. Separate worker
/// processes are not coordinated.
///
/// A turned-away delivery is a failed attempt as far as the broker knows.
/// Under Redis it uses up one retry, so a duplicate of a task that runs
/// longer than `max_retries × retry_backoff` ends up in the dead-letter
/// stream with an "already being processed" error while the original
/// completes normally.
#[derive(Debug, Clone, Default)]
pub struct InFlightVideos {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl InFlightVideos {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked.
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `video_id`, or `None` if it is already in flight.
    pub fn try_acquire(&self, video_id: &VideoId) -> Option<InFlightGuard> {
        let id = video_id.as_str().to_string();
        if !self.lock().insert(id.clone()) {
            return None;
        }
        Some(InFlightGuard {
            registry: self.clone(),
            id,
        })
    }

    pub fn contains(&self, video_id: &VideoId) -> bool {
        self.lock().contains(video_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the id when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    registry: InFlightVideos,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}
