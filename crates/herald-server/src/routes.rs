//! HTTP command surface under `/api`.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use herald_core::CommandError;
use herald_session::ControllerError;
use serde::Deserialize;

use crate::handlers::{BulkReport, StatusView};
use crate::server::AppState;

/// Errors surfaced by the HTTP routes, rendered as `{ error, code, detail? }`.
#[derive(Debug)]
pub enum ApiError {
    Command(CommandError),
    Controller(ControllerError),
    NotFound(&'static str),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Command(CommandError::NotConnected) => StatusCode::CONFLICT,
            Self::Command(CommandError::TransmissionFailed { .. }) => StatusCode::BAD_GATEWAY,
            Self::Command(_) => StatusCode::BAD_REQUEST,
            Self::Controller(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl From<CommandError> for ApiError {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}

impl From<ControllerError> for ApiError {
    fn from(e: ControllerError) -> Self {
        Self::Controller(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Command(e) => serde_json::json!({
                "error": e.to_string(),
                "code": e.code(),
                "detail": e,
            }),
            Self::Controller(e) => serde_json::json!({
                "error": e.to_string(),
                "code": "UNAVAILABLE",
            }),
            Self::NotFound(msg) => serde_json::json!({
                "error": msg,
                "code": "NOT_FOUND",
            }),
        };
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %body["error"], "request failed");
        }
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub to: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    pub targets: Vec<String>,
    pub message: String,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusView> {
    Json(state.handlers.status())
}

pub async fn pairing(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .handlers
        .controller
        .pairing_artifact()
        .map(|artifact| Json(serde_json::json!({ "artifact": artifact })))
        .ok_or(ApiError::NotFound("pairing artifact not available"))
}

pub async fn connect(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let current = state.handlers.controller.request_connect().await?;
    Ok(Json(serde_json::json!({ "state": current })))
}

pub async fn disconnect(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let controller = &state.handlers.controller;
    controller.request_disconnect().await?;
    Ok(Json(serde_json::json!({ "state": controller.status().state })))
}

pub async fn send(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = state.handlers.gateway.send_message(&req.to, &req.message).await?;
    Ok(Json(receipt))
}

pub async fn send_bulk(
    State(state): State<AppState>,
    Json(req): Json<BulkRequest>,
) -> Result<Json<BulkReport>, ApiError> {
    let delay = req.delay_ms.map(Duration::from_millis);
    let results = state
        .handlers
        .gateway
        .send_bulk(&req.targets, &req.message, delay)
        .await?;
    Ok(Json(BulkReport::from(results)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::DisconnectReason;

    #[test]
    fn command_errors_map_to_http_status() {
        let cases = [
            (CommandError::NotConnected, StatusCode::CONFLICT),
            (
                CommandError::InvalidTarget { target: "x y".into() },
                StatusCode::BAD_REQUEST,
            ),
            (CommandError::EmptyPayload, StatusCode::BAD_REQUEST),
            (
                CommandError::PayloadTooLarge { limit: 1, actual: 2 },
                StatusCode::BAD_REQUEST,
            ),
            (
                CommandError::TooManyTargets { limit: 1, actual: 2 },
                StatusCode::BAD_REQUEST,
            ),
            (
                CommandError::TransmissionFailed {
                    reason: DisconnectReason::Transient,
                    message: "reset".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn controller_stopped_is_unavailable() {
        assert_eq!(
            ApiError::from(ControllerError::Stopped).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::NotFound("x").status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn bulk_request_accepts_camel_case_delay() {
        let req: BulkRequest =
            serde_json::from_str(r#"{"targets":["A"],"message":"hi","delayMs":2500}"#).unwrap();
        assert_eq!(req.delay_ms, Some(2500));
        let req: BulkRequest = serde_json::from_str(r#"{"targets":[],"message":"hi"}"#).unwrap();
        assert_eq!(req.delay_ms, None);
    }
}
