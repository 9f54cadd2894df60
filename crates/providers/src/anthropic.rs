use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::settings::ProviderId;
use shared::CoreError;

use crate::adapter::{AuthStrategy, LlmRequest, ProviderConfig, RequestShape};

pub const ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";
pub const API_VERSION: &str = "2023-06-01";

pub static CONFIG: ProviderConfig = ProviderConfig {
    id: ProviderId::Anthropic,
    endpoint: ENDPOINT,
    auth: AuthStrategy::ApiKeyHeader {
        key_header: "x-api-key",
        version_header: "anthropic-version",
        version: API_VERSION,
    },
    default_model: DEFAULT_MODEL,
    shape: RequestShape::MessagesWithSystemField,
};

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Option<Vec<AnthropicContent>>,
    /// Legacy text-completions field
    #[serde(default)]
    completion: Option<String>,
}

pub(crate) fn build_body(req: &LlmRequest) -> Result<Value, CoreError> {
    // System text goes in its own field, never as a message
    let messages = req
        .conversation()
        .into_iter()
        .filter(|m| m.role != "system")
        .map(|m| AnthropicMessage {
            role: m.role,
            content: m.content,
        })
        .collect();

    let system = if req.system_prompt.trim().is_empty() {
        None
    } else {
        Some(req.system_prompt.clone())
    };

    let body = AnthropicRequest {
        model: req.model_or_default().to_string(),
        messages,
        system,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
    };
    Ok(serde_json::to_value(body)?)
}

pub(crate) fn extract(raw: &Value) -> Option<String> {
    let resp: AnthropicResponse = serde_json::from_value(raw.clone()).ok()?;
    let first = resp
        .content
        .and_then(|blocks| blocks.into_iter().next())
        .and_then(|block| block.text)
        .filter(|t| !t.is_empty());
    first
        .or(resp.completion)
        .map(|t| t.trim().to_string())
}
