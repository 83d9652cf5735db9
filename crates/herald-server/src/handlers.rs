//! RPC method handlers, shared by the push channel and the HTTP routes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use herald_core::SessionStatus;
use herald_session::{BulkOutcome, CommandGateway, SessionController};
use herald_telemetry::{LogQuery, SqliteLogSink};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::rpc::{self, encode, Params, RpcError, RpcResponse};

const DEFAULT_LOG_LIMIT: u32 = 50;

type Outcome = Result<Value, RpcError>;

/// What every handler can reach: the session, its gateway, the journal.
pub struct HandlerState {
    pub controller: SessionController,
    pub gateway: CommandGateway,
    pub logs: Option<Arc<SqliteLogSink>>,
    booted: Instant,
}

impl HandlerState {
    pub fn new(controller: SessionController, gateway: CommandGateway) -> Self {
        Self {
            controller,
            gateway,
            logs: None,
            booted: Instant::now(),
        }
    }

    pub fn with_logs(mut self, logs: Option<Arc<SqliteLogSink>>) -> Self {
        self.logs = logs;
        self
    }

    pub fn status(&self) -> StatusView {
        StatusView {
            status: self.controller.status(),
            observers: self.controller.hub().observer_count(),
        }
    }
}

/// Session status plus the number of live observers.
#[derive(Debug, Serialize)]
pub struct StatusView {
    #[serde(flatten)]
    pub status: SessionStatus,
    pub observers: usize,
}

#[derive(Debug, Serialize)]
pub struct BulkReport {
    pub sent: usize,
    pub failed: usize,
    pub results: Vec<BulkOutcome>,
}

impl From<Vec<BulkOutcome>> for BulkReport {
    fn from(results: Vec<BulkOutcome>) -> Self {
        let sent = results.iter().filter(|r| r.is_sent()).count();
        Self {
            sent,
            failed: results.len() - sent,
            results,
        }
    }
}

pub async fn dispatch(
    state: &Arc<HandlerState>,
    method: &str,
    params: &Value,
    id: Option<Value>,
) -> RpcResponse {
    let params = Params(params);
    let outcome = match method {
        "session.status" => encode(&state.status()),
        "session.pairing" => pairing(state),
        "session.connect" => connect(state).await,
        "session.disconnect" => disconnect(state).await,
        "message.send" => send(state, params).await,
        "message.sendBulk" => send_bulk(state, params).await,
        "system.ping" | "health" => Ok(health(state)),
        "logs.recent" => recent_logs(state, params),
        other => Err(RpcError::new(
            rpc::METHOD_NOT_FOUND,
            format!("no method named {other}"),
        )),
    };
    if let Err(e) = &outcome {
        debug!(method, code = e.code, "rpc call rejected");
    }
    RpcResponse::reply(id, outcome)
}

fn pairing(state: &HandlerState) -> Outcome {
    let artifact = state
        .controller
        .pairing_artifact()
        .ok_or_else(|| RpcError::new(rpc::UNAVAILABLE, "no pairing artifact is pending"))?;
    Ok(json!({ "artifact": artifact }))
}

async fn connect(state: &HandlerState) -> Outcome {
    let now = state.controller.request_connect().await.map_err(RpcError::internal)?;
    Ok(json!({ "state": now }))
}

async fn disconnect(state: &HandlerState) -> Outcome {
    state.controller.request_disconnect().await.map_err(RpcError::internal)?;
    Ok(json!({ "state": state.controller.status().state }))
}

async fn send(state: &HandlerState, params: Params<'_>) -> Outcome {
    let to = params.text("to")?;
    let message = params.text("message")?;
    let receipt = state.gateway.send_message(to, message).await?;
    encode(&receipt)
}

async fn send_bulk(state: &HandlerState, params: Params<'_>) -> Outcome {
    let targets = params.texts("targets")?;
    let message = params.text("message")?;
    let delay = params.opt_u64("delayMs").map(Duration::from_millis);
    let results = state.gateway.send_bulk(&targets, message, delay).await?;
    encode(&BulkReport::from(results))
}

pub(crate) fn health(state: &HandlerState) -> Value {
    let running = state.controller.is_running();
    json!({
        "status": if running { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.booted.elapsed().as_secs(),
        "components": {
            "controller": if running { "ok" } else { "stopped" },
            "session": state.controller.status().state,
        },
    })
}

/// Journal rows, newest first, sliced by any of the correlation fields.
fn recent_logs(state: &HandlerState, params: Params<'_>) -> Outcome {
    let Some(sink) = state.logs.as_deref() else {
        return Ok(json!({ "logs": [], "totalCount": 0, "enabled": false }));
    };

    let min_level = params
        .opt_text("level")
        .map(|raw| {
            herald_telemetry::parse_level(raw)
                .ok_or_else(|| RpcError::invalid_params(format!("unknown log level: {raw}")))
        })
        .transpose()?;
    let owned = |key: &str| params.opt_text(key).map(str::to_string);
    let limit = params
        .opt_u64("limit")
        .map_or(DEFAULT_LOG_LIMIT, |n| u32::try_from(n).unwrap_or(u32::MAX));

    let query = LogQuery {
        min_level,
        attempt_id: owned("attemptId"),
        observer_id: owned("observerId"),
        state: owned("state"),
        reason: owned("reason"),
        since: owned("since"),
        limit: Some(limit),
    };
    let logs = sink.query(&query).map_err(RpcError::internal)?;
    let total = sink.count().map_err(RpcError::internal)?;
    Ok(json!({ "logs": logs, "totalCount": total, "enabled": true }))
}
