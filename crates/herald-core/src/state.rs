use serde::{Deserialize, Serialize};

use crate::ids::AttemptId;
use crate::reason::DisconnectReason;

/// Lifecycle of the single managed session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    AwaitingPairing,
    Connected,
    Disconnected,
    Failed,
}

impl SessionState {
    /// An attempt is in flight or established; connect requests are no-ops here.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::AwaitingPairing | Self::Connected)
    }

    pub fn is_operable(self) -> bool {
        self == Self::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of the session, published after every transition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: SessionState,
    pub has_pairing_artifact: bool,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_disconnect_reason: Option<DisconnectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<AttemptId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_states() {
        assert!(SessionState::Connecting.is_active());
        assert!(SessionState::AwaitingPairing.is_active());
        assert!(SessionState::Connected.is_active());
        assert!(!SessionState::Idle.is_active());
        assert!(!SessionState::Disconnected.is_active());
        assert!(!SessionState::Failed.is_active());
    }

    #[test]
    fn only_connected_is_operable() {
        assert!(SessionState::Connected.is_operable());
        assert!(!SessionState::AwaitingPairing.is_operable());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&SessionState::AwaitingPairing).unwrap();
        assert_eq!(json, r#""awaiting_pairing""#);
        assert_eq!(SessionState::AwaitingPairing.to_string(), "awaiting_pairing");
    }

    #[test]
    fn status_wire_shape() {
        let status = SessionStatus {
            state: SessionState::Disconnected,
            retry_count: 2,
            last_disconnect_reason: Some(DisconnectReason::Transient),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "disconnected");
        assert_eq!(json["hasPairingArtifact"], false);
        assert_eq!(json["retryCount"], 2);
        assert_eq!(json["lastDisconnectReason"], "transient");
        assert!(json.get("lastError").is_none());
    }
}
