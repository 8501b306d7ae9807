//! Typed queue events and observer registration.
//!
//! The queue communicates outward only through these events (plus its
//! synchronous stats accessor). Observers are invoked synchronously at the
//! transition points, in registration order.

use crate::dispatcher::SyncAction;
use std::time::Duration;

/// An event emitted by the sync queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// The pending map changed.
    QueueUpdated {
        /// Number of items now pending.
        pending: usize,
    },
    /// A drain cycle started on a snapshotted batch.
    ProcessingStarted {
        /// Items in the batch.
        batch_size: usize,
    },
    /// A drain cycle finished.
    ProcessingCompleted {
        /// Items that completed.
        completed: usize,
        /// Items that failed terminally.
        failed: usize,
        /// Wall-clock duration of the cycle.
        duration: Duration,
    },
    /// An item's dispatch began.
    ItemProcessing {
        /// Document path.
        id: String,
    },
    /// An item finished without a terminal failure.
    ItemCompleted {
        /// Document path.
        id: String,
        /// What the dispatcher did.
        action: SyncAction,
        /// Dispatch duration.
        duration: Duration,
    },
    /// An item failed and will not be retried automatically.
    ItemFailed {
        /// Document path.
        id: String,
        /// The failure message.
        error: String,
        /// Retries already spent.
        retries: u32,
    },
    /// An item failed and was scheduled for another attempt.
    ItemRetry {
        /// Document path.
        id: String,
        /// Retry count after this scheduling.
        retries: u32,
        /// Backoff delay before re-entry.
        delay: Duration,
        /// The failure message.
        error: String,
    },
    /// The queue was paused.
    Paused,
    /// The queue was resumed.
    Resumed,
    /// All failed items were re-enqueued.
    RetryFailed {
        /// Items re-enqueued.
        count: usize,
    },
    /// All failed items were dropped.
    FailedCleared {
        /// Items dropped.
        count: usize,
    },
}

impl QueueEvent {
    /// Stable kebab-case name of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::QueueUpdated { .. } => "queue-updated",
            QueueEvent::ProcessingStarted { .. } => "processing-started",
            QueueEvent::ProcessingCompleted { .. } => "processing-completed",
            QueueEvent::ItemProcessing { .. } => "item-processing",
            QueueEvent::ItemCompleted { .. } => "item-completed",
            QueueEvent::ItemFailed { .. } => "item-failed",
            QueueEvent::ItemRetry { .. } => "item-retry",
            QueueEvent::Paused => "paused",
            QueueEvent::Resumed => "resumed",
            QueueEvent::RetryFailed { .. } => "retry-failed",
            QueueEvent::FailedCleared { .. } => "failed-cleared",
        }
    }
}

/// A registered listener for queue events.
pub trait QueueObserver: Send + Sync {
    /// Called synchronously for every emitted event.
    fn on_event(&self, event: &QueueEvent);
}

/// An observer that forwards every event to `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl QueueObserver for TracingObserver {
    fn on_event(&self, event: &QueueEvent) {
        match event {
            QueueEvent::ItemFailed { id, error, retries } => {
                tracing::warn!(id = %id, error = %error, retries, "sync item failed");
            }
            QueueEvent::ItemRetry {
                id,
                retries,
                delay,
                error,
            } => {
                tracing::info!(id = %id, retries, ?delay, error = %error, "sync item retry scheduled");
            }
            other => {
                tracing::debug!(event = other.name(), "queue event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names() {
        assert_eq!(QueueEvent::Paused.name(), "paused");
        assert_eq!(QueueEvent::QueueUpdated { pending: 1 }.name(), "queue-updated");
        assert_eq!(
            QueueEvent::ItemRetry {
                id: "a.md".into(),
                retries: 1,
                delay: Duration::from_secs(1),
                error: "x".into()
            }
            .name(),
            "item-retry"
        );
    }
}
