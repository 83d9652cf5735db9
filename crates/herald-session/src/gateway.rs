//! Command gateway: outbound operations gated on the session being connected.
//!
//! Nothing here changes session state. A failed send is reported to the
//! caller and otherwise forgotten; connection health is the controller's job.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_core::{ClientError, CommandError, DeliveryId, SessionEvent};
use herald_settings::GatewaySettings;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::controller::SessionController;
use crate::hub::EventHub;

#[derive(Clone, Debug)]
pub struct GatewayLimits {
    pub send_timeout: Duration,
    /// Bulk sends never go out faster than this.
    pub min_bulk_delay: Duration,
    pub max_bulk_targets: usize,
    pub max_payload_bytes: usize,
}

impl Default for GatewayLimits {
    fn default() -> Self {
        Self::from(&GatewaySettings::default())
    }
}

impl From<&GatewaySettings> for GatewayLimits {
    fn from(s: &GatewaySettings) -> Self {
        Self {
            send_timeout: Duration::from_millis(s.send_timeout_ms),
            min_bulk_delay: Duration::from_millis(s.min_bulk_delay_ms),
            max_bulk_targets: s.max_bulk_targets,
            max_payload_bytes: s.max_payload_bytes,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub to: String,
    pub delivery_id: DeliveryId,
    pub timestamp: DateTime<Utc>,
}

/// Result for one target of a bulk send.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BulkOutcome {
    Sent {
        target: String,
        #[serde(rename = "deliveryId")]
        delivery_id: DeliveryId,
    },
    Failed {
        target: String,
        error: CommandError,
    },
}

impl BulkOutcome {
    pub fn target(&self) -> &str {
        match self {
            Self::Sent { target, .. } | Self::Failed { target, .. } => target,
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

#[derive(Clone)]
pub struct CommandGateway {
    controller: SessionController,
    hub: Arc<EventHub>,
    limits: GatewayLimits,
}

impl CommandGateway {
    pub fn new(controller: SessionController, limits: GatewayLimits) -> Self {
        let hub = controller.hub().clone();
        Self {
            controller,
            hub,
            limits,
        }
    }

    pub fn limits(&self) -> &GatewayLimits {
        &self.limits
    }

    /// Send one text message. Fails with `NotConnected` unless the session
    /// is connected, before anything reaches the client.
    pub async fn send_message(&self, target: &str, payload: &str) -> Result<SendReceipt, CommandError> {
        let conn = self.controller.connection().ok_or(CommandError::NotConnected)?;
        let target = validate_target(target)?;
        self.validate_payload(payload)?;

        let sent = tokio::time::timeout(self.limits.send_timeout, conn.send_text(target, payload)).await;
        let delivery_id = match sent {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                warn!(target, error = %e, kind = e.error_kind(), "send failed");
                return Err(CommandError::transmission(&e));
            }
            Err(_) => {
                warn!(target, timeout_ms = self.limits.send_timeout.as_millis() as u64, "send timed out");
                return Err(CommandError::transmission(&ClientError::Timeout(
                    self.limits.send_timeout,
                )));
            }
        };

        let timestamp = Utc::now();
        debug!(target, delivery_id = %delivery_id, "message sent");
        self.hub.publish(SessionEvent::MessageSent {
            to: target.to_string(),
            payload: payload.to_string(),
            delivery_id: delivery_id.clone(),
            timestamp,
        });
        Ok(SendReceipt {
            to: target.to_string(),
            delivery_id,
            timestamp,
        })
    }

    /// Send `payload` to each target in order, one at a time, pausing at
    /// least `min_bulk_delay` between sends. Individual failures are
    /// recorded and the loop carries on; the result has one entry per target.
    pub async fn send_bulk(
        &self,
        targets: &[String],
        payload: &str,
        delay: Option<Duration>,
    ) -> Result<Vec<BulkOutcome>, CommandError> {
        if !self.controller.status().state.is_operable() {
            return Err(CommandError::NotConnected);
        }
        if targets.len() > self.limits.max_bulk_targets {
            return Err(CommandError::TooManyTargets {
                limit: self.limits.max_bulk_targets,
                actual: targets.len(),
            });
        }
        self.validate_payload(payload)?;

        let delay = delay
            .unwrap_or(self.limits.min_bulk_delay)
            .max(self.limits.min_bulk_delay);
        info!(targets = targets.len(), delay_ms = delay.as_millis() as u64, "bulk send started");

        let mut outcomes = Vec::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }
            let outcome = match self.send_message(target, payload).await {
                Ok(receipt) => BulkOutcome::Sent {
                    target: target.clone(),
                    delivery_id: receipt.delivery_id,
                },
                Err(error) => BulkOutcome::Failed {
                    target: target.clone(),
                    error,
                },
            };
            outcomes.push(outcome);
        }

        let sent = outcomes.iter().filter(|o| o.is_sent()).count();
        info!(sent, failed = outcomes.len() - sent, "bulk send finished");
        Ok(outcomes)
    }

    fn validate_payload(&self, payload: &str) -> Result<(), CommandError> {
        if payload.trim().is_empty() {
            return Err(CommandError::EmptyPayload);
        }
        if payload.len() > self.limits.max_payload_bytes {
            return Err(CommandError::PayloadTooLarge {
                limit: self.limits.max_payload_bytes,
                actual: payload.len(),
            });
        }
        Ok(())
    }
}

/// Targets are opaque to the gateway but must be a single non-empty token.
fn validate_target(target: &str) -> Result<&str, CommandError> {
    let trimmed = target.trim();
    if trimmed.is_empty() || trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CommandError::InvalidTarget {
            target: target.to_string(),
        });
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_validation() {
        assert_eq!(validate_target(" 15551234567@s.whatsapp.net ").unwrap(), "15551234567@s.whatsapp.net");
        assert!(validate_target("").is_err());
        assert!(validate_target("   ").is_err());
        assert!(validate_target("a b").is_err());
        assert!(validate_target("a\nb").is_err());
    }

    #[test]
    fn limits_from_settings() {
        let limits = GatewayLimits::default();
        assert_eq!(limits.send_timeout, Duration::from_secs(60));
        assert_eq!(limits.min_bulk_delay, Duration::from_secs(1));
        assert_eq!(limits.max_bulk_targets, 500);
    }

    #[test]
    fn bulk_outcome_wire_format() {
        let ok = BulkOutcome::Sent {
            target: "A".into(),
            delivery_id: DeliveryId::from_raw("X1"),
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "sent");
        assert_eq!(json["deliveryId"], "X1");

        let failed = BulkOutcome::Failed {
            target: "B".into(),
            error: CommandError::NotConnected,
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["target"], "B");
        assert_eq!(json["error"]["kind"], "not_connected");
        assert_eq!(failed.target(), "B");
        assert!(!failed.is_sent());
    }
}
