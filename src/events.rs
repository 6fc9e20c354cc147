// Event system for observing advisory requests as they run
// Implements event bus pattern using tokio broadcast channels

use crate::advisor::AdvisorState;
use crate::error::SourceKind;
use crate::synthesizer::DifficultyBand;
use std::fmt;
use tokio::sync::broadcast;

/// Maximum capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// One lifecycle event of one advisory request
#[derive(Debug, Clone)]
pub struct Event {
    /// Sequence number of the request that emitted this event
    pub request_id: u64,
    pub kind: EventKind,
    pub timestamp: chrono::DateTime<chrono::Local>,
}

impl Event {
    /// Create a new event
    pub fn new(request_id: u64, kind: EventKind) -> Self {
        Self {
            request_id,
            kind,
            timestamp: chrono::Local::now(),
        }
    }

    /// Check if this event belongs to a specific request
    pub fn is_for(&self, request_id: u64) -> bool {
        self.request_id == request_id
    }
}

/// Types of events that can be sent through the event bus
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Orchestrator moved between states
    StateChanged { from: AdvisorState, to: AdvisorState },

    /// An evidence source failed and was replaced by empty evidence
    ///
    /// `soft` is false when the error was something other than the source
    /// being unreachable.
    SourceFailed {
        source: SourceKind,
        reason: String,
        soft: bool,
    },

    /// Synthesis finished
    VerdictReady { band: DifficultyBand },

    /// Request ended in FAILED
    Failed { reason: String },
}

/// Event bus for publishing and subscribing to events
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with custom capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events - returns a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Fails only when nobody is subscribed.
    pub fn publish(&self, event: Event) -> Result<usize, EventError> {
        self.tx.send(event).map_err(|_| EventError::SendFailed)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during event operations
#[derive(Debug, Clone)]
pub enum EventError {
    SendFailed,
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::SendFailed => write!(f, "Failed to send event"),
        }
    }
}

impl std::error::Error for EventError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = Event::new(
            7,
            EventKind::StateChanged {
                from: AdvisorState::Start,
                to: AdvisorState::Normalizing,
            },
        );

        assert_eq!(event.request_id, 7);
        assert!(event.is_for(7));
        assert!(!event.is_for(8));
        assert!(matches!(event.kind, EventKind::StateChanged { .. }));
    }

    #[test]
    fn test_event_bus_subscription() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        let _rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_publish_without_subscribers_fails() {
        let bus = EventBus::new();
        let result = bus.publish(Event::new(1, EventKind::Failed { reason: "x".to_string() }));
        assert!(result.is_err());
    }

    #[test]
    fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(Event::new(
            3,
            EventKind::VerdictReady {
                band: DifficultyBand::Hard,
            },
        ))
        .unwrap();

        // Both subscribers should receive the event
        let first = rx1.try_recv().unwrap();
        assert_eq!(
            first.kind,
            EventKind::VerdictReady {
                band: DifficultyBand::Hard
            }
        );
        assert!(rx2.try_recv().is_ok());
    }
}
