//! Boundary to the external messaging protocol library.
//!
//! The controller drives a [`ProtocolClient`] to open connections and
//! receives everything the client observes through an [`EventSink`]. Each
//! sink is bound to one connection attempt so that late events from an
//! abandoned attempt can be told apart from the live one.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::credentials::Credentials;
use crate::errors::ClientError;
use crate::ids::{AttemptId, DeliveryId};
use crate::reason::CloseSignal;

/// What the protocol client reports about a connection.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    /// A pairing challenge was issued; the artifact is opaque.
    PairingChallenge { artifact: String },
    Opened,
    Closed(CloseSignal),
    CredentialsUpdated(Credentials),
    MessageReceived {
        from: String,
        payload: String,
        timestamp: DateTime<Utc>,
    },
    PresenceUpdated { chat: String, presence: Value },
}

impl ClientEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PairingChallenge { .. } => "pairing_challenge",
            Self::Opened => "opened",
            Self::Closed(_) => "closed",
            Self::CredentialsUpdated(_) => "credentials_updated",
            Self::MessageReceived { .. } => "message_received",
            Self::PresenceUpdated { .. } => "presence_updated",
        }
    }
}

/// A client event tagged with the attempt that produced it.
#[derive(Clone, Debug)]
pub struct AttemptEvent {
    pub attempt: AttemptId,
    pub event: ClientEvent,
}

/// Ingress handle given to the protocol client for one attempt.
#[derive(Clone, Debug)]
pub struct EventSink {
    attempt: AttemptId,
    tx: mpsc::UnboundedSender<AttemptEvent>,
}

impl EventSink {
    pub fn new(attempt: AttemptId, tx: mpsc::UnboundedSender<AttemptEvent>) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> &AttemptId {
        &self.attempt
    }

    /// Never blocks. Returns false once the controller has gone away.
    pub fn emit(&self, event: ClientEvent) -> bool {
        self.tx
            .send(AttemptEvent {
                attempt: self.attempt.clone(),
                event,
            })
            .is_ok()
    }
}

/// Factory for connections to the remote network.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    fn name(&self) -> &str;

    /// Start a connection. With `None` credentials the client begins a fresh
    /// pairing. Lifecycle events flow through `sink` until the connection ends.
    async fn connect(
        &self,
        credentials: Option<Credentials>,
        sink: EventSink,
    ) -> Result<Arc<dyn ClientConnection>, ClientError>;
}

/// A live connection handed back by [`ProtocolClient::connect`].
#[async_trait]
pub trait ClientConnection: Send + Sync {
    async fn send_text(&self, target: &str, payload: &str) -> Result<DeliveryId, ClientError>;

    /// Invalidate the session remotely, then close.
    async fn logout(&self) -> Result<(), ClientError>;

    /// Close without invalidating; credentials stay usable for resume.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_tags_events_with_attempt() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let attempt = AttemptId::new();
        let sink = EventSink::new(attempt.clone(), tx);

        assert!(sink.emit(ClientEvent::Opened));
        assert!(sink.emit(ClientEvent::PairingChallenge {
            artifact: "XYZ".into()
        }));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.attempt, attempt);
        assert_eq!(first.event.kind(), "opened");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event.kind(), "pairing_challenge");
    }

    #[test]
    fn emit_after_receiver_dropped_reports_false() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(AttemptId::new(), tx);
        drop(rx);
        assert!(!sink.emit(ClientEvent::Opened));
    }
}
