//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may specify any subset of fields; the rest keep their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    pub server: ServerSettings,
    pub reconnect: ReconnectSettings,
    pub gateway: GatewaySettings,
    pub store: StoreSettings,
    pub bridge: BridgeSettings,
    pub logging: LoggingSettings,
    /// Begin connecting as soon as the process starts.
    pub connect_on_start: bool,
}

impl Default for HeraldSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            reconnect: ReconnectSettings::default(),
            gateway: GatewaySettings::default(),
            store: StoreSettings::default(),
            bridge: BridgeSettings::default(),
            logging: LoggingSettings::default(),
            connect_on_start: true,
        }
    }
}

impl HeraldSettings {
    /// Reject combinations the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        let r = &self.reconnect;
        if r.base_delay_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "reconnect.baseDelayMs must be positive".into(),
            ));
        }
        if r.max_delay_ms < r.base_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect.maxDelayMs ({}) is below baseDelayMs ({})",
                r.max_delay_ms, r.base_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&r.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect.jitterFactor must be within 0..=1, got {}",
                r.jitter_factor
            )));
        }
        if self.gateway.max_bulk_targets == 0 {
            return Err(SettingsError::InvalidValue(
                "gateway.maxBulkTargets must be at least 1".into(),
            ));
        }
        if self.bridge.command.trim().is_empty() {
            return Err(SettingsError::InvalidValue("bridge.command is empty".into()));
        }
        Ok(())
    }
}

/// HTTP / WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Per-observer outbound queue depth before events are dropped.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    /// Observers silent for longer than this are disconnected.
    pub client_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
        }
    }
}

/// Reconnection policy for the connection controller.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Automatic retries before the session is parked in `failed`.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
    /// Floor applied to the delay after a rate-limited close.
    pub rate_limit_min_delay_ms: u64,
    /// Consecutive auth rejections tolerated before giving up.
    pub auth_retry_limit: u32,
    /// Clear stored credentials once auth retries are exhausted.
    pub wipe_on_auth_exhausted: bool,
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
            rate_limit_min_delay_ms: 60_000,
            auth_retry_limit: 2,
            wipe_on_auth_exhausted: true,
            connect_timeout_ms: 30_000,
        }
    }
}

impl ReconnectSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn rate_limit_min_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_min_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Limits for the command gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    pub send_timeout_ms: u64,
    /// Lower bound on the pause between bulk sends.
    pub min_bulk_delay_ms: u64,
    pub max_bulk_targets: usize,
    pub max_payload_bytes: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            send_timeout_ms: 60_000,
            min_bulk_delay_ms: 1_000,
            max_bulk_targets: 500,
            max_payload_bytes: 65_536,
        }
    }
}

/// Credential store location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Relative paths resolve under `~/.herald`.
    pub db_path: String,
    pub key_path: String,
    /// Encrypt credentials at rest.
    pub encrypt: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "database/herald.db".to_string(),
            key_path: "secret_key".to_string(),
            encrypt: true,
        }
    }
}

/// Sidecar process that hosts the protocol library.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    pub command: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            command: "node".to_string(),
            args: vec!["bridge/index.js".to_string()],
            working_dir: None,
        }
    }
}

/// Logging output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    /// Persist warn+ records to SQLite.
    pub persist_warnings: bool,
    pub log_db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            persist_warnings: true,
            log_db_path: "database/herald-logs.db".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = HeraldSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.reconnect.max_retries, 5);
        assert_eq!(settings.reconnect.base_delay(), Duration::from_secs(2));
        assert_eq!(settings.reconnect.max_delay(), Duration::from_secs(30));
        assert_eq!(settings.gateway.send_timeout_ms, 60_000);
        assert!(settings.connect_on_start);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(HeraldSettings::default()).unwrap();
        assert_eq!(json["reconnect"]["maxRetries"], 5);
        assert_eq!(json["gateway"]["minBulkDelayMs"], 1000);
        assert_eq!(json["connectOnStart"], true);
        assert!(json["bridge"].get("workingDir").is_none());
    }

    #[test]
    fn partial_section_keeps_defaults() {
        let settings: HeraldSettings =
            serde_json::from_str(r#"{"reconnect": {"maxRetries": 3}}"#).unwrap();
        assert_eq!(settings.reconnect.max_retries, 3);
        assert_eq!(settings.reconnect.auth_retry_limit, 2);
        assert_eq!(settings.server.port, 3000);
    }

    #[test]
    fn validate_rejects_inverted_delays() {
        let mut settings = HeraldSettings::default();
        settings.reconnect.max_delay_ms = 500;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("maxDelayMs"));
    }

    #[test]
    fn validate_rejects_bad_jitter() {
        let mut settings = HeraldSettings::default();
        settings.reconnect.jitter_factor = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_bridge_command() {
        let mut settings = HeraldSettings::default();
        settings.bridge.command = "  ".into();
        assert!(settings.validate().is_err());
    }
}
