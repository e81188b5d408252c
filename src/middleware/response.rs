use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiError;

/// A fully decided HTTP reply. `body: None` means an empty body (204).
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Option<Value>,
}

impl Reply {
    /// `{success: true, data}`
    pub fn success(status: StatusCode, data: Value) -> Self {
        Self {
            status,
            body: Some(json!({ "success": true, "data": data })),
        }
    }

    /// `{success: false, error}`
    pub fn failure(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(json!({ "success": false, "error": message.into() })),
        }
    }

    /// `{success: false, error, errors}`; `error` repeats the first listed message.
    pub fn failures(status: StatusCode, errors: Value) -> Self {
        let first = match &errors {
            Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
            Value::Object(map) => map.values().next().and_then(Value::as_str).map(str::to_string),
            Value::String(s) => Some(s.clone()),
            _ => None,
        };
        Self {
            status,
            body: Some(json!({
                "success": false,
                "error": first.unwrap_or_else(|| "Request failed".to_string()),
                "errors": errors,
            })),
        }
    }

    pub fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            body: None,
        }
    }
}

impl From<&ApiError> for Reply {
    fn from(err: &ApiError) -> Self {
        Self {
            status: err.status(),
            body: Some(err.to_json()),
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        }
    }
}

/// Write-once response slot shared by the middleware chain and the handler.
///
/// Whoever sends first wins; later sends are refused, so every request
/// produces exactly one reply.
#[derive(Debug, Clone, Default)]
pub struct ResponseHandle {
    slot: Arc<OnceCell<Reply>>,
}

impl ResponseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` (and drops `reply`) when a reply was already sent.
    pub fn send(&self, reply: Reply) -> bool {
        let status = reply.status;
        match self.slot.set(reply) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!("Response already sent; dropping second reply with status {}", status);
                false
            }
        }
    }

    pub fn error(&self, err: &ApiError) -> bool {
        self.send(Reply::from(err))
    }

    pub fn headers_sent(&self) -> bool {
        self.slot.get().is_some()
    }

    pub fn reply(&self) -> Option<Reply> {
        self.slot.get().cloned()
    }

    /// The sent reply, or a 500 when nothing was ever sent.
    pub fn into_response(self) -> Response {
        match self.slot.get() {
            Some(reply) => reply.clone().into_response(),
            None => {
                tracing::error!("Request finished without a response");
                Reply::failure(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_send_wins() {
        let res = ResponseHandle::new();
        let shared = res.clone();

        assert!(!res.headers_sent());
        assert!(shared.send(Reply::success(StatusCode::OK, json!({"a": 1}))));
        assert!(res.headers_sent());
        assert!(!res.send(Reply::failure(StatusCode::BAD_REQUEST, "late")));

        let reply = res.reply().unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body.unwrap()["data"]["a"], 1);
    }

    #[test]
    fn test_failures_envelope_names_first_error() {
        let reply = Reply::failures(StatusCode::BAD_REQUEST, json!(["name missing", "bad email"]));
        let body = reply.body.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "name missing");
        assert_eq!(body["errors"][1], "bad email");
    }

    #[test]
    fn test_no_content_has_empty_body() {
        let response = Reply::no_content().into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_unsent_handle_becomes_500() {
        let response = ResponseHandle::new().into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
