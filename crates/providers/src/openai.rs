use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::settings::ProviderId;
use shared::CoreError;

use crate::adapter::{AuthStrategy, LlmRequest, ProviderConfig, RequestShape};

pub const ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

pub static CONFIG: ProviderConfig = ProviderConfig {
    id: ProviderId::OpenAI,
    endpoint: ENDPOINT,
    auth: AuthStrategy::Bearer,
    default_model: DEFAULT_MODEL,
    shape: RequestShape::ChatMessages,
};

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

// ── Response types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// System prompt first, then the conversation (or the single prompt message).
pub(crate) fn build_body(req: &LlmRequest) -> Result<Value, CoreError> {
    let mut messages = Vec::new();
    if !req.system_prompt.is_empty() {
        messages.push(OpenAIMessage {
            role: "system".to_string(),
            content: req.system_prompt.clone(),
        });
    }
    messages.extend(req.conversation().into_iter().map(|m| OpenAIMessage {
        role: m.role,
        content: m.content,
    }));

    let body = OpenAIRequest {
        model: req.model_or_default().to_string(),
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
    };
    Ok(serde_json::to_value(body)?)
}

/// `choices[0].message.content`, trimmed
pub(crate) fn extract(raw: &Value) -> Option<String> {
    let resp: OpenAIResponse = serde_json::from_value(raw.clone()).ok()?;
    resp.choices
        .into_iter()
        .next()?
        .message
        .content
        .map(|c| c.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RequestOptions;
    use serde_json::json;
    use shared::agent_api::ChatMessage;

    #[test]
    fn test_body_shape() {
        let options = RequestOptions {
            max_tokens: Some(200),
            temperature: Some(0.5),
            system_prompt: Some("Summarize.".into()),
            ..Default::default()
        };
        let req = LlmRequest::new(ProviderId::OpenAI, "Page text", &options);
        let body = build_body(&req).unwrap();

        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["max_tokens"], 200);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(
            body["messages"],
            json!([
                {"role": "system", "content": "Summarize."},
                {"role": "user", "content": "Page text"}
            ])
        );
    }

    #[test]
    fn test_messages_override_follow_system() {
        let options = RequestOptions {
            model: Some("gpt-4o".into()),
            messages: Some(vec![
                ChatMessage::user("Q1"),
                ChatMessage::assistant("A1"),
                ChatMessage::user("Q2"),
            ]),
            ..Default::default()
        };
        let req = LlmRequest::new(ProviderId::OpenAI, "ignored", &options);
        let body = build_body(&req).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[3]["content"], "Q2");
    }

    #[test]
    fn test_extract_trims() {
        let raw = json!({"choices": [{"message": {"role": "assistant", "content": "  Hello \n"}}]});
        assert_eq!(extract(&raw).as_deref(), Some("Hello"));
        assert_eq!(extract(&json!({"choices": []})), None);
    }
}
