//! Push-channel request/response frames.
//!
//! Requests are `{ method, params?, id? }`. Responses echo `id` and carry
//! either `result` or `error: { code, message, data? }`, with a `success`
//! flag for clients that only branch on that.

use herald_core::CommandError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
pub const UNAVAILABLE: &str = "UNAVAILABLE";

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn reply(id: Option<Value>, outcome: Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(result) => Self {
                id,
                success: true,
                result: Some(result),
                error: None,
            },
            Err(error) => Self {
                id,
                success: false,
                result: None,
                error: Some(error),
            },
        }
    }

    /// The frame could not be read at all, so there is no id to echo.
    pub fn unparseable() -> Self {
        Self::reply(None, Err(RpcError::new(PARSE_ERROR, "request is not valid JSON")))
    }
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(INTERNAL_ERROR, err.to_string())
    }
}

/// Gateway rejections keep their own code and carry the structured error
/// as `data`.
impl From<CommandError> for RpcError {
    fn from(err: CommandError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            data: serde_json::to_value(&err).ok(),
        }
    }
}

/// Serialize a handler result.
pub fn encode<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(RpcError::internal)
}

/// Typed access to a request's `params` object.
#[derive(Clone, Copy)]
pub struct Params<'a>(pub &'a Value);

impl<'a> Params<'a> {
    pub fn text(self, key: &str) -> Result<&'a str, RpcError> {
        self.opt_text(key)
            .ok_or_else(|| RpcError::invalid_params(format!("{key} is required and must be a string")))
    }

    pub fn opt_text(self, key: &str) -> Option<&'a str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn texts(self, key: &str) -> Result<Vec<String>, RpcError> {
        let Some(items) = self.0.get(key).and_then(Value::as_array) else {
            return Err(RpcError::invalid_params(format!("{key} is required and must be an array")));
        };
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| RpcError::invalid_params(format!("{key} must contain only strings")))
            })
            .collect()
    }

    pub fn opt_u64(self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_without_params_or_id() {
        let req: RpcRequest = serde_json::from_str(r#"{"method":"session.status"}"#).unwrap();
        assert_eq!(req.method, "session.status");
        assert!(req.params.is_none());
        assert!(req.id.is_none());

        let req: RpcRequest =
            serde_json::from_str(r#"{"method":"message.send","params":{"to":"A"},"id":"r1"}"#)
                .unwrap();
        assert_eq!(req.id, Some(json!("r1")));
    }

    #[test]
    fn ok_reply_has_result_only() {
        let frame = serde_json::to_value(RpcResponse::reply(Some(json!(1)), Ok(json!({"state": "open"})))).unwrap();
        assert_eq!(frame, json!({"id": 1, "success": true, "result": {"state": "open"}}));
    }

    #[test]
    fn error_reply_has_error_only() {
        let frame = serde_json::to_value(RpcResponse::reply(
            Some(json!(7)),
            Err(RpcError::new(METHOD_NOT_FOUND, "no method foo.bar")),
        ))
        .unwrap();
        assert_eq!(frame["success"], false);
        assert_eq!(frame["error"]["code"], "METHOD_NOT_FOUND");
        assert!(frame.get("result").is_none());
        assert!(frame["error"].get("data").is_none());
    }

    #[test]
    fn command_errors_keep_their_code() {
        let err = RpcError::from(CommandError::NotConnected);
        assert_eq!(err.code, "NOT_CONNECTED");
        assert_eq!(err.data.as_ref().unwrap()["kind"], "not_connected");
    }

    #[test]
    fn unparseable_has_no_id() {
        let resp = RpcResponse::unparseable();
        assert!(resp.id.is_none());
        assert_eq!(resp.error.unwrap().code, PARSE_ERROR);
    }

    #[test]
    fn params_access() {
        let raw = json!({"to": "A", "targets": ["A", "B"], "delayMs": 1500, "bad": [1]});
        let params = Params(&raw);
        assert_eq!(params.text("to").unwrap(), "A");
        assert_eq!(params.text("missing").unwrap_err().code, INVALID_PARAMS);
        assert_eq!(params.texts("targets").unwrap(), vec!["A", "B"]);
        assert!(params.texts("bad").is_err());
        assert!(params.texts("to").is_err());
        assert_eq!(params.opt_u64("delayMs"), Some(1500));
        assert_eq!(params.opt_text("missing"), None);
    }
}
