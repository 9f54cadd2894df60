//! Provider adapter: the only place that knows provider wire formats.
//!
//! `build_request` turns a prompt plus options into a provider-specific JSON
//! body, `extract_text` pulls the answer back out of a provider response.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::agent_api::ChatMessage;
use shared::settings::ProviderId;
use shared::CoreError;
use tracing::warn;

use crate::{anthropic, gemini, openai};

pub const DEFAULT_MAX_TOKENS: u32 = 500;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Returned by `extract_text` when the response body is empty
pub const NO_RESPONSE_TEXT: &str = "Error: No response data received from LLM.";
/// Returned by `extract_text` when no known shape matches
pub const PARSE_FAILURE_TEXT: &str = "Error: Could not parse LLM response. Structure unexpected.";

/// How the credential travels with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// Dedicated key header plus a fixed API version header
    ApiKeyHeader {
        key_header: &'static str,
        version_header: &'static str,
        version: &'static str,
    },
    /// Key passed as a URL query parameter
    QueryParam(&'static str),
}

/// Body layout family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    /// `messages` list with the system prompt as the first message
    ChatMessages,
    /// `messages` list with the system prompt in a dedicated field
    MessagesWithSystemField,
    /// nested `contents[].parts[].text` with a `generationConfig` object
    Contents,
}

impl RequestShape {
    fn build_body(self, request: &LlmRequest) -> Result<Value, CoreError> {
        match self {
            RequestShape::ChatMessages => openai::build_body(request),
            RequestShape::MessagesWithSystemField => anthropic::build_body(request),
            RequestShape::Contents => gemini::build_body(request),
        }
    }

    fn extract(self, raw: &Value) -> Option<String> {
        match self {
            RequestShape::ChatMessages => openai::extract(raw),
            RequestShape::MessagesWithSystemField => anthropic::extract(raw),
            RequestShape::Contents => gemini::extract(raw),
        }
    }
}

/// Static description of one upstream provider
#[derive(Debug, Clone, Copy)]
pub struct ProviderConfig {
    pub id: ProviderId,
    pub endpoint: &'static str,
    pub auth: AuthStrategy,
    pub default_model: &'static str,
    pub shape: RequestShape,
}

impl ProviderConfig {
    pub fn for_provider(provider: ProviderId) -> &'static ProviderConfig {
        match provider {
            ProviderId::OpenAI => &openai::CONFIG,
            ProviderId::Anthropic => &anthropic::CONFIG,
            ProviderId::Gemini => &gemini::CONFIG,
        }
    }
}

/// Caller options for a single request. Accepts both camelCase and the
/// snake_case names the UI scripts send.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, alias = "max_tokens")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default, alias = "system_prompt")]
    pub system_prompt: Option<String>,
    /// Extra material prepended to the prompt as a labeled block
    #[serde(default)]
    pub context: Option<String>,
    /// Pre-built conversation that replaces the single prompt message
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Fully-resolved request, defaults applied
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub provider: ProviderId,
    /// Prompt with any context block already merged in
    pub prompt: String,
    pub system_prompt: String,
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub messages: Option<Vec<ChatMessage>>,
    pub role: String,
}

impl LlmRequest {
    pub fn new(provider: ProviderId, prompt: &str, options: &RequestOptions) -> Self {
        let prompt = match options.context.as_deref().filter(|c| !c.is_empty()) {
            Some(context) => format!("Context:\n{}\n\nUser Query:\n{}", context, prompt),
            None => prompt.to_string(),
        };

        Self {
            provider,
            prompt,
            system_prompt: options
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            model: options.model.clone().filter(|m| !m.trim().is_empty()),
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            messages: options.messages.clone().filter(|m| !m.is_empty()),
            role: options.role.clone().unwrap_or_else(|| "user".to_string()),
        }
    }

    /// Model to send, falling back to the provider default
    pub fn model_or_default(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or(ProviderConfig::for_provider(self.provider).default_model)
    }

    /// Conversation to send: the override if present, else one prompt message
    pub(crate) fn conversation(&self) -> Vec<ChatMessage> {
        match &self.messages {
            Some(messages) => messages.clone(),
            None => vec![ChatMessage::new(self.role.clone(), self.prompt.clone())],
        }
    }

    /// Provider-specific JSON body
    pub fn to_body(&self) -> Result<Value, CoreError> {
        ProviderConfig::for_provider(self.provider).shape.build_body(self)
    }
}

/// Builds the JSON body for `provider`; unknown providers are rejected.
pub fn build_request(
    provider: &str,
    prompt: &str,
    options: &RequestOptions,
) -> Result<Value, CoreError> {
    let provider: ProviderId = provider.parse()?;
    LlmRequest::new(provider, prompt, options).to_body()
}

/// Extracts the answer text from a provider response.
///
/// Never fails: unknown shapes fall back to generic `text` / `message`
/// fields and finally to [`PARSE_FAILURE_TEXT`].
pub fn extract_text(provider: ProviderId, raw: &Value) -> String {
    if raw.is_null() {
        return NO_RESPONSE_TEXT.to_string();
    }

    if let Some(text) = ProviderConfig::for_provider(provider).shape.extract(raw) {
        return text;
    }

    warn!(
        provider = %provider,
        "Could not find standard text content, response structure may have changed"
    );
    if let Some(s) = raw.as_str() {
        return s.to_string();
    }
    for field in ["text", "message"] {
        if let Some(s) = raw.get(field).and_then(Value::as_str) {
            return s.to_string();
        }
    }
    PARSE_FAILURE_TEXT.to_string()
}
