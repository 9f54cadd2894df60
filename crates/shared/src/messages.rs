//! Cross-surface message envelope.
//!
//! Requests are `{action, data}` (plus optional `target` and `requestId`),
//! responses are `{success, data?, error?}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Target name of the background coordination core
pub const BACKGROUND_TARGET: &str = "background";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    pub action: String,
    #[serde(default)]
    pub data: Value,
    /// Intended receiver; `None` means the background core
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Opaque correlation id echoed back on the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl RequestMessage {
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data,
            target: None,
            request_id: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn is_for_background(&self) -> bool {
        self.target
            .as_deref()
            .map_or(true, |t| t == BACKGROUND_TARGET)
    }

    /// Deserializes `data` into a typed payload, mapping failures to `Validation`
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, CoreError> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            CoreError::Validation(format!("Invalid data for '{}': {}", self.action, e))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ResponseEnvelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            request_id: None,
        }
    }

    /// Success without a `data` field (the JS side sees `undefined`)
    pub fn ok_empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            request_id: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

impl From<Result<Value, CoreError>> for ResponseEnvelope {
    fn from(result: Result<Value, CoreError>) -> Self {
        match result {
            Ok(data) => ResponseEnvelope::ok(data),
            Err(e) => ResponseEnvelope::err(e.to_string()),
        }
    }
}
