use super::clock::SharedClock;
use crate::models::{OutboundEvent, SessionEnvelope};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Typed fan-out for one session's outbound events.
///
/// Every component of a session holds a clone; the sequence counter and the
/// broadcast sender are shared, so envelopes leave in exactly the order they
/// were published.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    session_id: Uuid,
    clock: SharedClock,
    sender: broadcast::Sender<SessionEnvelope>,
    sequence: Mutex<u64>,
}

impl EventBus {
    pub fn new(session_id: Uuid, capacity: usize, clock: SharedClock) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                session_id,
                clock,
                sender,
                sequence: Mutex::new(0),
            }),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn clock(&self) -> SharedClock {
        self.inner.clock.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEnvelope> {
        self.inner.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }

    /// Sequence of the most recently published envelope, 0 before the first
    pub fn last_sequence(&self) -> u64 {
        *self.inner.sequence.lock()
    }

    pub fn publish(&self, event: OutboundEvent) -> SessionEnvelope {
        let mut sequence = self.inner.sequence.lock();
        *sequence += 1;

        let envelope = SessionEnvelope {
            session_id: self.inner.session_id,
            sequence: *sequence,
            emitted_at: self.inner.clock.now(),
            event,
        };

        tracing::debug!(
            session_id = %envelope.session_id,
            sequence = envelope.sequence,
            event = envelope.event.event_name(),
            "publishing outbound event"
        );

        // No receivers is normal before the transport attaches
        let _ = self.inner.sender.send(envelope.clone());
        envelope
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("session_id", &self.inner.session_id)
            .field("last_sequence", &self.last_sequence())
            .finish()
    }
}
