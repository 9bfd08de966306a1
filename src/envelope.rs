//! Response Envelope
//!
//! Every API response, success or failure, is wrapped in
//! `{error, message, result?}`. `result` is omitted rather than null.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

/// Uniform response shape
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub error: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Envelope {
    /// Successful envelope without a result
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            error: false,
            message: message.into(),
            result: None,
        }
    }

    /// Failed envelope
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            result: None,
        }
    }

    /// Attach a result payload. Values that fail to serialize are dropped.
    pub fn with_result<T: Serialize>(mut self, result: T) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => self.result = Some(value),
            Err(e) => tracing::warn!("Failed to serialize envelope result: {}", e),
        }
        self
    }

    /// Pair with an explicit HTTP status
    pub fn with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        self.with_status(StatusCode::OK)
    }
}
