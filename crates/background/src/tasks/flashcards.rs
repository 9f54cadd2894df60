use providers::RequestOptions;
use regex::Regex;
use serde::{Deserialize, Serialize};
use shared::settings::flags;
use shared::CoreError;
use std::sync::LazyLock;
use tracing::warn;

use super::{require_text, snippet, strip_code_fences, LlmChoice, LlmGateway};
use crate::prompts::{self, DEFAULT_LANGUAGE, FLASHCARD_PROMPT};

const DEFAULT_FLASHCARDS: u32 = 10;
const TOKENS_PER_CARD: u32 = 150;
/// Upper bound on cards per request; larger asks are clamped
pub const MAX_FLASHCARDS: u32 = 50;

/// First `[ {...} ]` run in a chatty response
static EMBEDDED_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\s*\{[\s\S]*?\}\s*\]").expect("array pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardRequest {
    pub text: String,
    #[serde(default)]
    pub num_flashcards: Option<u32>,
    #[serde(default)]
    pub language: Option<String>,
    /// Template with `{{text}}`, `{{num_flashcards}}` and `{{language}}` slots
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(flatten)]
    pub llm: LlmChoice,
}

/// Parses a model response into flashcards.
///
/// Code fences are stripped first. If the whole text is not a JSON array,
/// the first embedded array of objects is tried instead.
pub fn parse_flashcards(raw: &str) -> Result<Vec<Flashcard>, CoreError> {
    let cleaned = strip_code_fences(raw);
    if let Ok(cards) = serde_json::from_str::<Vec<Flashcard>>(&cleaned) {
        return Ok(cards);
    }

    let embedded = EMBEDDED_ARRAY
        .find(&cleaned)
        .and_then(|m| serde_json::from_str::<Vec<Flashcard>>(m.as_str()).ok());
    match embedded {
        Some(cards) => {
            warn!("Flashcards recovered from surrounding text");
            Ok(cards)
        }
        None => Err(CoreError::Parse(format!(
            "Failed to parse flashcards from LLM response. Raw response snippet: {}",
            snippet(raw, 300)
        ))),
    }
}

pub async fn generate_flashcards(
    gateway: &LlmGateway,
    request: FlashcardRequest,
) -> Result<Vec<Flashcard>, CoreError> {
    require_text(&request.text, "Text content for flashcards cannot be empty.")?;
    let settings = gateway.require_feature(flags::FLASHCARDS).await?;
    let provider = LlmGateway::resolve_provider(request.llm.provider.as_deref(), &settings)?;

    let count = request
        .num_flashcards
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_FLASHCARDS)
        .min(MAX_FLASHCARDS);
    let language = request
        .language
        .as_deref()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or(DEFAULT_LANGUAGE);
    let count_text = count.to_string();

    let prompt = match request.custom_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(template) => prompts::fill_custom(
            template,
            &[
                ("text", request.text.as_str()),
                ("num_flashcards", count_text.as_str()),
                ("language", language),
            ],
        ),
        None => prompts::flashcard_prompt(&request.text, count, language),
    };

    let options = RequestOptions {
        model: request.llm.model.clone(),
        max_tokens: Some(request.llm.max_tokens.unwrap_or(TOKENS_PER_CARD * count)),
        temperature: Some(FLASHCARD_PROMPT.temperature),
        system_prompt: Some(FLASHCARD_PROMPT.system.to_string()),
        ..Default::default()
    };

    let raw = gateway
        .complete(
            FLASHCARD_PROMPT.task,
            provider,
            &prompt,
            &options,
            request.llm.api_key.as_deref(),
        )
        .await?;
    parse_flashcards(&raw)
}
