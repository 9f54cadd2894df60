use providers::RequestOptions;
use serde::Deserialize;
use shared::settings::flags;
use shared::CoreError;

use super::{require_text, LlmChoice, LlmGateway};
use crate::prompts::{self, DEFAULT_LANGUAGE, SUMMARY_PROMPT};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryLength {
    Short,
    #[default]
    Medium,
    Bullets,
    Paragraph,
}

impl SummaryLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryLength::Short => "short",
            SummaryLength::Medium => "medium",
            SummaryLength::Bullets => "bullets",
            SummaryLength::Paragraph => "paragraph",
        }
    }

    fn max_tokens(&self) -> u32 {
        match self {
            SummaryLength::Short => 100,
            SummaryLength::Bullets => 300,
            SummaryLength::Medium | SummaryLength::Paragraph => 200,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeRequest {
    pub text: String,
    #[serde(default)]
    pub summary_length: SummaryLength,
    #[serde(default)]
    pub language: Option<String>,
    /// Template with `{{text}}` and `{{language}}` slots
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(flatten)]
    pub llm: LlmChoice,
}

pub async fn summarize(gateway: &LlmGateway, request: SummarizeRequest) -> Result<String, CoreError> {
    require_text(&request.text, "Text to summarize cannot be empty.")?;
    let settings = gateway.require_feature(flags::SUMMARIZATION).await?;
    let provider = LlmGateway::resolve_provider(request.llm.provider.as_deref(), &settings)?;

    let language = request.language.as_deref().filter(|l| !l.trim().is_empty());
    let prompt = match request.custom_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(template) => prompts::fill_custom(
            template,
            &[
                ("text", request.text.as_str()),
                ("language", language.unwrap_or(DEFAULT_LANGUAGE)),
            ],
        ),
        None => prompts::summary_prompt(&request.text, request.summary_length.as_str(), language),
    };

    let options = RequestOptions {
        model: request.llm.model.clone(),
        max_tokens: Some(request.llm.max_tokens.unwrap_or(request.summary_length.max_tokens())),
        temperature: Some(SUMMARY_PROMPT.temperature),
        system_prompt: Some(SUMMARY_PROMPT.system.to_string()),
        ..Default::default()
    };

    gateway
        .complete(
            SUMMARY_PROMPT.task,
            provider,
            &prompt,
            &options,
            request.llm.api_key.as_deref(),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testing::{disable, gateway, openai_reply};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_short_summary_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"max_tokens": 100, "temperature": 0.5})))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_reply(" Cats nap. ")))
            .expect(1)
            .mount(&server)
            .await;

        let (_, gateway) = gateway(&server).await;
        let request: SummarizeRequest = serde_json::from_value(json!({
            "text": "Cats sleep for most of the day.",
            "summaryLength": "short"
        }))
        .unwrap();

        let summary = summarize(&gateway, request).await.unwrap();
        assert_eq!(summary, "Cats nap.");
    }

    #[tokio::test]
    async fn test_custom_prompt_is_filled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "messages": [
                    {"role": "system"},
                    {"role": "user", "content": "TL;DR in Italian: hello world"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_reply("ciao")))
            .expect(1)
            .mount(&server)
            .await;

        let (_, gateway) = gateway(&server).await;
        let request = SummarizeRequest {
            text: "hello world".into(),
            language: Some("Italian".into()),
            custom_prompt: Some("TL;DR in {{language}}: {{TEXT}}".into()),
            ..Default::default()
        };
        assert_eq!(summarize(&gateway, request).await.unwrap(), "ciao");
    }

    #[tokio::test]
    async fn test_empty_text_and_disabled_flag() {
        let server = MockServer::start().await;
        let (store, gateway) = gateway(&server).await;

        let err = summarize(&gateway, SummarizeRequest::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "Text to summarize cannot be empty.");

        disable(&store, flags::SUMMARIZATION).await;
        let request = SummarizeRequest {
            text: "something".into(),
            ..Default::default()
        };
        let err = summarize(&gateway, request).await.unwrap_err();
        assert!(matches!(err, CoreError::FeatureDisabled(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
