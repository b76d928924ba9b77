//! Batch lifecycle notifications and their fan-out to subscribers.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// Terminal result of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        self == Outcome::Succeeded
    }
}

/// Serialized without a tag; `name()` is the wire event name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum BatchEvent {
    Started {
        batch_id: u64,
        total: usize,
    },
    Progress {
        batch_id: u64,
        file_name: String,
        progress: u8,
        completed: usize,
        total: usize,
    },
    FileCompleted {
        batch_id: u64,
        file_name: String,
        input_path: PathBuf,
        output_path: PathBuf,
        outcome: Outcome,
        success: bool,
        message: Option<String>,
    },
    AllCompleted {
        batch_id: u64,
        succeeded: usize,
        total: usize,
        /// Directory this batch wrote to, from its options snapshot.
        output_directory: PathBuf,
    },
    /// `batch_id` is None when the batch was rejected before it got one.
    Error {
        batch_id: Option<u64>,
        message: String,
    },
}

impl BatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BatchEvent::Started { .. } => "batch.started",
            BatchEvent::Progress { .. } => "batch.progress",
            BatchEvent::FileCompleted { .. } => "batch.fileCompleted",
            BatchEvent::AllCompleted { .. } => "batch.allCompleted",
            BatchEvent::Error { .. } => "batch.error",
        }
    }

    pub fn batch_id(&self) -> Option<u64> {
        match self {
            BatchEvent::Started { batch_id, .. }
            | BatchEvent::Progress { batch_id, .. }
            | BatchEvent::FileCompleted { batch_id, .. }
            | BatchEvent::AllCompleted { batch_id, .. } => Some(*batch_id),
            BatchEvent::Error { batch_id, .. } => *batch_id,
        }
    }
}

pub type BatchEventEmitter = Arc<dyn Fn(&BatchEvent) + Send + Sync>;

/// Subscribers are called synchronously on the emitting thread (a worker or the
/// caller of `start`), so they must not block for long.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<BatchEventEmitter>>,
}

impl EventBus {
    pub fn subscribe(&self, subscriber: BatchEventEmitter) {
        self.subscribers.write().push(subscriber);
    }

    pub fn emit(&self, event: BatchEvent) {
        log::trace!(target: "tiny_mp3::batch::events", "emit {}", event.name());
        let subscribers = self.subscribers.read().clone();
        for subscriber in subscribers {
            subscriber(&event);
        }
    }
}
