//! Event system for progress operations
//!
//! Provides an event bus for notifying listeners about attempt and progress
//! changes. Side-effect consumers hang off this bus:
//! - Score roll-up
//! - Competency-met recording
//! - Grade passback dispatch
//!
//! All of those stay outside this crate; they subscribe and react.

use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::model::{Completion, CoursewareElementType};

/// Events emitted by the attempt/progress services
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A new attempt ordinal was minted
    AttemptCreated {
        deployment_id: Uuid,
        student_id: Uuid,
        element_id: Uuid,
        element_type: CoursewareElementType,
        attempt_id: Uuid,
        value: u32,
    },

    /// A progress snapshot was persisted for an element
    ProgressChanged {
        deployment_id: Uuid,
        change_id: Uuid,
        student_id: Uuid,
        element_id: Uuid,
        element_type: CoursewareElementType,
        attempt_id: Uuid,
        completion: Completion,
        evaluation_id: Option<Uuid>,
    },

    /// A completed-walkable audit fact was recorded
    WalkableCompleted {
        deployment_id: Uuid,
        student_id: Uuid,
        element_id: Uuid,
        parent_element_id: Uuid,
    },

    /// An activity was restarted with a fresh attempt
    ActivityRestarted {
        deployment_id: Uuid,
        student_id: Uuid,
        activity_id: Uuid,
        attempt_id: Uuid,
        value: u32,
    },
}

/// Event bus for broadcasting progress events
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: ProgressEvent) {
        trace!(event = ?event, "Emitting progress event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Current subscriber count
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
