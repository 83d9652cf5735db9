use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::DeliveryId;
use crate::reason::DisconnectReason;
use crate::state::SessionState;

/// Events pushed to observers, in controller emission order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "state_changed")]
    StateChanged {
        state: SessionState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<DisconnectReason>,
    },

    /// Only emitted while the session is awaiting pairing.
    #[serde(rename = "pairing_ready")]
    PairingReady { artifact: String },

    #[serde(rename = "message_received")]
    MessageReceived {
        from: String,
        payload: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "message_sent")]
    MessageSent {
        to: String,
        payload: String,
        #[serde(rename = "deliveryId")]
        delivery_id: DeliveryId,
        timestamp: DateTime<Utc>,
    },

    /// Contact availability as reported by the network. Live only, never
    /// replayed.
    #[serde(rename = "presence_updated")]
    PresenceUpdated { chat: String, presence: Value },
}

impl SessionEvent {
    pub fn state_changed(state: SessionState, reason: Option<DisconnectReason>) -> Self {
        Self::StateChanged { state, reason }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::PairingReady { .. } => "pairing_ready",
            Self::MessageReceived { .. } => "message_received",
            Self::MessageSent { .. } => "message_sent",
            Self::PresenceUpdated { .. } => "presence_updated",
        }
    }
}
