use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::settings::ProviderId;
use shared::CoreError;

use crate::adapter::{AuthStrategy, LlmRequest, ProviderConfig, RequestShape};

/// The model is part of the path, so a per-request model override has no effect.
pub const ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent";
pub const DEFAULT_MODEL: &str = "gemini-pro";

pub static CONFIG: ProviderConfig = ProviderConfig {
    id: ProviderId::Gemini,
    endpoint: ENDPOINT,
    auth: AuthStrategy::QueryParam("key"),
    default_model: DEFAULT_MODEL,
    shape: RequestShape::Contents,
};

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Option<Vec<Option<GeminiCandidate>>>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

/// The system prompt is not sent; this API version has no slot for it.
pub(crate) fn build_body(req: &LlmRequest) -> Result<Value, CoreError> {
    let contents = req
        .conversation()
        .into_iter()
        .filter(|m| m.role != "system")
        .map(|m| {
            // Gemini expects roles: "user" | "model"
            let role = match m.role.as_str() {
                "assistant" => "model".to_string(),
                _ => m.role,
            };
            GeminiContent {
                role,
                parts: vec![GeminiPart { text: m.content }],
            }
        })
        .collect();

    let body = GeminiRequest {
        contents,
        generation_config: GenerationConfig {
            max_output_tokens: req.max_tokens,
            temperature: req.temperature,
        },
    };
    Ok(serde_json::to_value(body)?)
}

pub(crate) fn extract(raw: &Value) -> Option<String> {
    let resp: GeminiResponse = serde_json::from_value(raw.clone()).ok()?;

    let text = resp
        .candidates
        .and_then(|c| c.into_iter().next().flatten())
        .and_then(|c| c.content)
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text)
        .filter(|t| !t.is_empty());
    if let Some(text) = text {
        return Some(text.trim().to_string());
    }

    let feedback = resp.prompt_feedback?;
    let reason = feedback.block_reason?;
    let ratings = feedback
        .safety_ratings
        .map(|r| r.to_string())
        .unwrap_or_default();
    Some(format!(
        "Error: Request blocked by API. Reason: {}. {}",
        reason, ratings
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RequestOptions;
    use serde_json::json;
    use shared::agent_api::ChatMessage;

    #[test]
    fn test_body_shape_omits_system_and_model() {
        let options = RequestOptions {
            max_tokens: Some(300),
            temperature: Some(0.5),
            system_prompt: Some("ignored".into()),
            model: Some("gemini-1.5-pro".into()),
            ..Default::default()
        };
        let req = LlmRequest::new(ProviderId::Gemini, "Hello", &options);
        let body = build_body(&req).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [{"role": "user", "parts": [{"text": "Hello"}]}],
                "generationConfig": {"maxOutputTokens": 300, "temperature": 0.5}
            })
        );
    }

    #[test]
    fn test_assistant_role_becomes_model() {
        let options = RequestOptions {
            messages: Some(vec![ChatMessage::user("Q"), ChatMessage::assistant("A")]),
            ..Default::default()
        };
        let req = LlmRequest::new(ProviderId::Gemini, "", &options);
        let body = build_body(&req).unwrap();
        assert_eq!(body["contents"][1]["role"], "model");
    }

    #[test]
    fn test_safety_block_reported() {
        let raw = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let text = extract(&raw).unwrap();
        assert!(text.starts_with("Error: Request blocked by API. Reason: SAFETY."));

        let with_ratings = json!({
            "promptFeedback": {
                "blockReason": "OTHER",
                "safetyRatings": [{"category": "HARM_CATEGORY_HARASSMENT", "probability": "HIGH"}]
            }
        });
        assert!(extract(&with_ratings).unwrap().contains("HARM_CATEGORY_HARASSMENT"));
    }

    #[test]
    fn test_extract_candidate_text() {
        let raw = json!({"candidates": [{"content": {"parts": [{"text": "Answer\n"}], "role": "model"}}]});
        assert_eq!(extract(&raw).as_deref(), Some("Answer"));
    }
}
