use serde::{Deserialize, Serialize};

/// Closed set of disconnect causes. Decides whether the controller retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Account logged out; stored credentials are dead.
    LoggedOut,
    /// Another client took over this session.
    SessionSuperseded,
    /// Network blip, timeout or server-side close.
    Transient,
    /// Credential state was refused by the remote side.
    AuthRejected,
    RateLimited,
    Unknown,
}

/// How the controller reacts to a classified disconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryClass {
    /// Wipe credentials and return to idle.
    Reset,
    /// Stop retrying; a human has to reconnect.
    Terminal,
    /// Retry, but only a few times before giving up.
    Limited,
    Standard,
    /// Retry with a raised minimum delay.
    Throttled,
}

impl DisconnectReason {
    pub fn retry_class(self) -> RetryClass {
        match self {
            Self::LoggedOut => RetryClass::Reset,
            Self::SessionSuperseded => RetryClass::Terminal,
            Self::AuthRejected => RetryClass::Limited,
            Self::RateLimited => RetryClass::Throttled,
            Self::Transient | Self::Unknown => RetryClass::Standard,
        }
    }

    pub fn is_retryable(self) -> bool {
        !matches!(self.retry_class(), RetryClass::Reset | RetryClass::Terminal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoggedOut => "logged_out",
            Self::SessionSuperseded => "session_superseded",
            Self::Transient => "transient",
            Self::AuthRejected => "auth_rejected",
            Self::RateLimited => "rate_limited",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw close information as reported by the protocol client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseSignal {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CloseSignal {
    pub fn with_code(code: u16) -> Self {
        Self {
            status_code: Some(code),
            message: None,
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            message: Some(message.into()),
        }
    }

    /// Map the network's status codes onto a [`DisconnectReason`].
    pub fn classify(&self) -> DisconnectReason {
        match self.status_code {
            Some(401) => DisconnectReason::LoggedOut,
            Some(440) => DisconnectReason::SessionSuperseded,
            Some(403 | 411 | 500) => DisconnectReason::AuthRejected,
            Some(429) => DisconnectReason::RateLimited,
            Some(408 | 428 | 503 | 515) => DisconnectReason::Transient,
            _ => DisconnectReason::Unknown,
        }
    }

    pub fn describe(&self) -> String {
        match (&self.status_code, &self.message) {
            (Some(code), Some(msg)) => format!("{code}: {msg}"),
            (Some(code), None) => format!("status {code}"),
            (None, Some(msg)) => msg.clone(),
            (None, None) => "connection closed".into(),
        }
    }
}
