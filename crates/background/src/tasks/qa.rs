use providers::RequestOptions;
use serde::Deserialize;
use shared::agent_api::ChatMessage;
use shared::settings::flags;
use shared::CoreError;

use super::{require_text, snippet, LlmChoice, LlmGateway};
use crate::prompts::{QA_PAGE_HINT, QA_PROMPT};

const PAGE_CONTEXT_CHARS: usize = 2000;
const DEFAULT_QA_MAX_TOKENS: u32 = 700;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub page_text: Option<String>,
    /// Earlier turns, oldest first
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
    #[serde(default)]
    pub custom_system_prompt: Option<String>,
    #[serde(flatten)]
    pub llm: LlmChoice,
}

/// Builds the system prompt and the conversation sent for `request`.
pub fn build_conversation(request: &AskRequest) -> (String, Vec<ChatMessage>) {
    let page_text = request
        .page_text
        .as_deref()
        .filter(|t| !t.trim().is_empty());

    let mut system = request
        .custom_system_prompt
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| QA_PROMPT.system.to_string());
    if page_text.is_some() {
        system.push_str(QA_PAGE_HINT);
    }

    let user_turn = match page_text {
        Some(text) => format!(
            "Based on the following context if relevant:\n\n---\n{}...\n---\n\nMy question is: {}",
            snippet(text, PAGE_CONTEXT_CHARS),
            request.question
        ),
        None => request.question.clone(),
    };

    let mut messages = request.chat_history.clone();
    messages.push(ChatMessage::user(user_turn));
    (system, messages)
}

pub async fn ask_question(gateway: &LlmGateway, request: AskRequest) -> Result<String, CoreError> {
    require_text(&request.question, "Question cannot be empty.")?;
    let settings = gateway.require_feature(flags::QA).await?;
    let provider = LlmGateway::resolve_provider(request.llm.provider.as_deref(), &settings)?;

    let (system, messages) = build_conversation(&request);
    let options = RequestOptions {
        model: request.llm.model.clone(),
        max_tokens: Some(request.llm.max_tokens.unwrap_or(DEFAULT_QA_MAX_TOKENS)),
        temperature: Some(QA_PROMPT.temperature),
        system_prompt: Some(system),
        messages: Some(messages),
        ..Default::default()
    };

    gateway
        .complete(
            QA_PROMPT.task,
            provider,
            &request.question,
            &options,
            request.llm.api_key.as_deref(),
        )
        .await
}
