//! Fan-out of session events to live observers.
//!
//! The hub keeps just enough state (current state, last reason, pairing
//! artifact) to bring a new observer up to date. Replay and registration
//! happen under the same lock as publishing, so an observer sees either an
//! event in its replay or live, never both and never neither.

use std::collections::HashMap;

use herald_core::{DisconnectReason, ObserverId, SessionEvent, SessionState};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A registered observer's end of the hub.
pub struct Subscription {
    pub id: ObserverId,
    pub events: mpsc::Receiver<SessionEvent>,
}

struct HubState {
    state: SessionState,
    reason: Option<DisconnectReason>,
    pairing_artifact: Option<String>,
    observers: HashMap<ObserverId, mpsc::Sender<SessionEvent>>,
}

pub struct EventHub {
    inner: Mutex<HubState>,
    queue_depth: usize,
}

impl EventHub {
    /// `queue_depth` bounds each observer's backlog; events beyond it are
    /// dropped for that observer only.
    pub fn new(queue_depth: usize) -> Self {
        Self {
            inner: Mutex::new(HubState {
                state: SessionState::Idle,
                reason: None,
                pairing_artifact: None,
                observers: HashMap::new(),
            }),
            queue_depth: queue_depth.max(2),
        }
    }

    /// Register a new observer and replay the current state (and pairing
    /// artifact, if awaiting pairing). No earlier events are replayed.
    pub fn subscribe(&self) -> Subscription {
        let id = ObserverId::new();
        let (tx, rx) = mpsc::channel(self.queue_depth);

        let mut inner = self.inner.lock();
        let _ = tx.try_send(SessionEvent::state_changed(inner.state, inner.reason));
        if inner.state == SessionState::AwaitingPairing {
            if let Some(artifact) = &inner.pairing_artifact {
                let _ = tx.try_send(SessionEvent::PairingReady {
                    artifact: artifact.clone(),
                });
            }
        }
        let _ = inner.observers.insert(id.clone(), tx);
        debug!(observer_id = %id, observers = inner.observers.len(), "observer subscribed");
        drop(inner);

        Subscription { id, events: rx }
    }

    /// Returns false if the observer was not registered.
    pub fn unsubscribe(&self, id: &ObserverId) -> bool {
        let removed = self.inner.lock().observers.remove(id).is_some();
        if removed {
            debug!(observer_id = %id, "observer unsubscribed");
        }
        removed
    }

    /// Deliver to every observer without blocking. Full queues drop the
    /// event for that observer; closed ones are removed.
    pub fn publish(&self, event: SessionEvent) {
        let mut inner = self.inner.lock();
        match &event {
            SessionEvent::StateChanged { state, reason } => {
                inner.state = *state;
                inner.reason = *reason;
                if *state != SessionState::AwaitingPairing {
                    inner.pairing_artifact = None;
                }
            }
            SessionEvent::PairingReady { artifact } => {
                inner.pairing_artifact = Some(artifact.clone());
            }
            _ => {}
        }

        let mut gone = Vec::new();
        for (id, tx) in &inner.observers {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(observer_id = %id, event = event.event_type(), "observer queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(id.clone()),
            }
        }
        for id in gone {
            let _ = inner.observers.remove(&id);
            debug!(observer_id = %id, "removed closed observer");
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }
}
