//! Event types for the Burnt Beats event system
//!
//! Provides generation lifecycle events and the EventBus used to fan them
//! out to SSE clients and any other in-process listener.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Burnt Beats event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BeatsEvent {
    /// A generation job passed validation and its process is being spawned
    GenerationStarted {
        /// Job identifier (one per request)
        job_id: Uuid,
        /// Generation kind (`midi`, `audio`, `voice-clone`)
        kind: String,
        /// Output file stem chosen for the job
        stem: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A generation job produced all of its artifacts
    GenerationCompleted {
        job_id: Uuid,
        kind: String,
        /// Verified artifact paths
        artifact_paths: Vec<String>,
        /// Wall-clock time spent waiting on the subprocess
        duration_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A generation job failed at any stage
    GenerationFailed {
        job_id: Uuid,
        kind: String,
        /// Error kind (`validation`, `timeout`, ...)
        error_kind: String,
        duration_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl BeatsEvent {
    /// Event type name, used as the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            BeatsEvent::GenerationStarted { .. } => "GenerationStarted",
            BeatsEvent::GenerationCompleted { .. } => "GenerationCompleted",
            BeatsEvent::GenerationFailed { .. } => "GenerationFailed",
        }
    }

    /// Job the event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            BeatsEvent::GenerationStarted { job_id, .. }
            | BeatsEvent::GenerationCompleted { job_id, .. }
            | BeatsEvent::GenerationFailed { job_id, .. } => *job_id,
        }
    }
}

/// Broadcast bus for [`BeatsEvent`]s
///
/// Cloning is cheap; all clones share the same channel.
///
/// # Examples
///
/// ```
/// use beats_common::events::{BeatsEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(BeatsEvent::GenerationStarted {
///     job_id: uuid::Uuid::new_v4(),
///     kind: "midi".to_string(),
///     stem: "My_Song_1730000000000_0a1b2c3d".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BeatsEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before the
    /// oldest are dropped for slow receivers.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<BeatsEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if nobody is listening.
    pub fn emit(
        &self,
        event: BeatsEvent,
    ) -> Result<usize, broadcast::error::SendError<BeatsEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: BeatsEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
