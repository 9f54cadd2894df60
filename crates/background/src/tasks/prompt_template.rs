//! User-authored prompt templates with `{{placeholder}}` slots.
//!
//! Known slots: `page`, `selection`, `transcript`, `language`, `date`,
//! `time`, `url`. Matching ignores case. Any other `{{word}}` is removed.

use chrono::{DateTime, Local};
use providers::RequestOptions;
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use shared::CoreError;
use std::sync::LazyLock;

use super::{LlmChoice, LlmGateway};
use crate::prompts::TEMPLATE_PROMPT;

const DEFAULT_TEMPLATE_MAX_TOKENS: u32 = 800;
const FALLBACK_LANGUAGE: &str = "en";

static LEFTOVER_SLOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{[a-zA-Z0-9_]+\}\}").expect("slot pattern is valid"));

/// Page material available to a template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptContext {
    #[serde(default)]
    pub page_text: String,
    #[serde(default)]
    pub selected_text: String,
    #[serde(default)]
    pub youtube_transcript: String,
    #[serde(default)]
    pub page_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRequest {
    pub template: String,
    /// Gathered from the active surface when absent
    #[serde(default)]
    pub context: Option<PromptContext>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default, alias = "system_prompt")]
    pub system_prompt: Option<String>,
    #[serde(flatten)]
    pub llm: LlmChoice,
}

fn replace_slot(text: &str, slot: &str, value: &str) -> String {
    match Regex::new(&format!(r"(?i)\{{\{{{}\}}\}}", slot)) {
        Ok(re) => re.replace_all(text, NoExpand(value)).into_owned(),
        Err(_) => text.to_string(),
    }
}

/// Fills every known slot and strips the rest.
pub fn fill_template(
    template: &str,
    context: &PromptContext,
    language: &str,
    now: DateTime<Local>,
) -> Result<String, CoreError> {
    if template.trim().is_empty() {
        return Err(CoreError::validation("Prompt template string cannot be empty."));
    }

    let date = now.format("%Y-%m-%d").to_string();
    let time = now.format("%H:%M:%S").to_string();
    let slots = [
        ("page", context.page_text.as_str()),
        ("selection", context.selected_text.as_str()),
        ("transcript", context.youtube_transcript.as_str()),
        ("language", language),
        ("date", date.as_str()),
        ("time", time.as_str()),
        ("url", context.page_url.as_str()),
    ];

    let filled = slots
        .iter()
        .fold(template.to_string(), |acc, (slot, value)| replace_slot(&acc, slot, value));
    let filled = LEFTOVER_SLOT.replace_all(&filled, "").into_owned();

    if filled.trim().is_empty() {
        return Err(CoreError::validation(
            "Filled prompt is empty after replacing placeholders. Check your template and context.",
        ));
    }
    Ok(filled)
}

pub async fn run_template(gateway: &LlmGateway, request: TemplateRequest) -> Result<String, CoreError> {
    let settings = gateway.settings().user_settings().await?;
    let language = request
        .language
        .clone()
        .filter(|l| !l.trim().is_empty())
        .or_else(|| settings.selected_language.clone())
        .unwrap_or_else(|| FALLBACK_LANGUAGE.to_string());

    let context = request.context.clone().unwrap_or_default();
    let prompt = fill_template(&request.template, &context, &language, Local::now())?;
    let provider = LlmGateway::resolve_provider(request.llm.provider.as_deref(), &settings)?;

    let options = RequestOptions {
        model: request.llm.model.clone(),
        max_tokens: Some(request.llm.max_tokens.unwrap_or(DEFAULT_TEMPLATE_MAX_TOKENS)),
        temperature: Some(request.temperature.unwrap_or(TEMPLATE_PROMPT.temperature)),
        system_prompt: Some(
            request
                .system_prompt
                .clone()
                .unwrap_or_else(|| TEMPLATE_PROMPT.system.to_string()),
        ),
        ..Default::default()
    };

    gateway
        .complete(
            TEMPLATE_PROMPT.task,
            provider,
            &prompt,
            &options,
            request.llm.api_key.as_deref(),
        )
        .await
}
