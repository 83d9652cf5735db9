use std::time::Duration;

use serde::Serialize;

use crate::reason::DisconnectReason;

/// Failures reported by the external protocol client.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("rate limited")]
    RateLimited,
    #[error("connection closed")]
    Closed,
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    pub fn classify(&self) -> DisconnectReason {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::Closed => DisconnectReason::Transient,
            Self::AuthRejected(_) => DisconnectReason::AuthRejected,
            Self::RateLimited => DisconnectReason::RateLimited,
            Self::InvalidTarget(_) | Self::Protocol(_) => DisconnectReason::Unknown,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network_error",
            Self::AuthRejected(_) => "auth_rejected",
            Self::RateLimited => "rate_limited",
            Self::Closed => "closed",
            Self::InvalidTarget(_) => "invalid_target",
            Self::Protocol(_) => "protocol_error",
        }
    }
}

/// Errors returned by the command gateway. None of them change session state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandError {
    #[error("session is not connected")]
    NotConnected,
    #[error("invalid target: {target}")]
    InvalidTarget { target: String },
    #[error("message payload is empty")]
    EmptyPayload,
    #[error("payload of {actual} bytes exceeds limit of {limit}")]
    PayloadTooLarge { limit: usize, actual: usize },
    #[error("{actual} targets exceeds limit of {limit}")]
    TooManyTargets { limit: usize, actual: usize },
    #[error("transmission failed ({reason}): {message}")]
    TransmissionFailed {
        reason: DisconnectReason,
        message: String,
    },
}

impl CommandError {
    pub fn transmission(err: &ClientError) -> Self {
        match err {
            ClientError::InvalidTarget(target) => Self::InvalidTarget {
                target: target.clone(),
            },
            other => Self::TransmissionFailed {
                reason: other.classify(),
                message: other.to_string(),
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::InvalidTarget { .. } => "INVALID_TARGET",
            Self::EmptyPayload => "EMPTY_PAYLOAD",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::TooManyTargets { .. } => "TOO_MANY_TARGETS",
            Self::TransmissionFailed { .. } => "TRANSMISSION_FAILED",
        }
    }

    /// Caller-side mistake, as opposed to a session or network condition.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            Self::InvalidTarget { .. }
                | Self::EmptyPayload
                | Self::PayloadTooLarge { .. }
                | Self::TooManyTargets { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_classification() {
        assert_eq!(
            ClientError::Timeout(Duration::from_secs(60)).classify(),
            DisconnectReason::Transient
        );
        assert_eq!(ClientError::Network("reset".into()).classify(), DisconnectReason::Transient);
        assert_eq!(ClientError::Closed.classify(), DisconnectReason::Transient);
        assert_eq!(
            ClientError::AuthRejected("bad creds".into()).classify(),
            DisconnectReason::AuthRejected
        );
        assert_eq!(ClientError::RateLimited.classify(), DisconnectReason::RateLimited);
        assert_eq!(ClientError::Protocol("?".into()).classify(), DisconnectReason::Unknown);
    }

    #[test]
    fn timeout_becomes_transient_transmission_failure() {
        let err = CommandError::transmission(&ClientError::Timeout(Duration::from_secs(1)));
        assert!(matches!(
            err,
            CommandError::TransmissionFailed {
                reason: DisconnectReason::Transient,
                ..
            }
        ));
        assert_eq!(err.code(), "TRANSMISSION_FAILED");
    }

    #[test]
    fn client_invalid_target_maps_to_command_invalid_target() {
        let err = CommandError::transmission(&ClientError::InvalidTarget("nobody".into()));
        assert_eq!(
            err,
            CommandError::InvalidTarget {
                target: "nobody".into()
            }
        );
        assert!(err.is_invalid_request());
    }

    #[test]
    fn command_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(CommandError::NotConnected).unwrap();
        assert_eq!(json["kind"], "not_connected");

        let json = serde_json::to_value(CommandError::TransmissionFailed {
            reason: DisconnectReason::RateLimited,
            message: "rate limited".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "transmission_failed");
        assert_eq!(json["reason"], "rate_limited");
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(ClientError::Closed.error_kind(), "closed");
        assert_eq!(ClientError::RateLimited.error_kind(), "rate_limited");
    }
}
