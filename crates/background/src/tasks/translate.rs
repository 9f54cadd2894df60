use providers::RequestOptions;
use serde::Deserialize;
use shared::settings::flags;
use shared::CoreError;

use super::{require_text, LlmChoice, LlmGateway};
use crate::prompts::{self, TRANSLATE_PROMPT};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    pub text: String,
    /// Falls back to the user's selected language
    #[serde(default)]
    pub target_language: Option<String>,
    #[serde(default)]
    pub source_language: Option<String>,
    #[serde(flatten)]
    pub llm: LlmChoice,
}

pub async fn translate(gateway: &LlmGateway, request: TranslateRequest) -> Result<String, CoreError> {
    require_text(&request.text, "Text to translate cannot be empty.")?;
    let settings = gateway.require_feature(flags::TRANSLATION).await?;

    let non_blank = |l: &String| !l.trim().is_empty();
    let target = request
        .target_language
        .clone()
        .filter(non_blank)
        .or_else(|| settings.selected_language.clone().filter(non_blank))
        .ok_or_else(|| CoreError::validation("Target language is required for translation."))?;
    let provider = LlmGateway::resolve_provider(request.llm.provider.as_deref(), &settings)?;

    let prompt = prompts::translate_prompt(
        &request.text,
        &target,
        request.source_language.as_deref().filter(|l| !l.trim().is_empty()),
    );
    // translations run about as long as the source
    let budget = (request.text.chars().count() as u32 / 2).clamp(200, 2000);
    let options = RequestOptions {
        model: request.llm.model.clone(),
        max_tokens: Some(request.llm.max_tokens.unwrap_or(budget)),
        temperature: Some(TRANSLATE_PROMPT.temperature),
        system_prompt: Some(TRANSLATE_PROMPT.system.to_string()),
        ..Default::default()
    };

    gateway
        .complete(
            TRANSLATE_PROMPT.task,
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
    use crate::tasks::testing::{gateway, openai_reply};
    use serde_json::json;
    use services::KeyValueStore;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_missing_target_language() {
        let server = MockServer::start().await;
        let (_, gateway) = gateway(&server).await;
        let request = TranslateRequest {
            text: "Hello".into(),
            ..Default::default()
        };
        let err = translate(&gateway, request).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_selected_language_is_used() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "max_tokens": 200,
                "messages": [
                    {"role": "system"},
                    {"role": "user", "content": "Translate the following text into Spanish. Output only the translation.\n\n\"Good morning\""}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_reply("Buenos días")))
            .expect(1)
            .mount(&server)
            .await;

        let (store, gateway) = gateway(&server).await;
        let mut settings = store.get("userSettings").await.unwrap().unwrap();
        settings["selectedLanguage"] = json!("Spanish");
        store.set("userSettings", settings).await.unwrap();

        let request = TranslateRequest {
            text: "Good morning".into(),
            ..Default::default()
        };
        assert_eq!(translate(&gateway, request).await.unwrap(), "Buenos días");
    }
}
