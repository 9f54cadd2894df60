use providers::RequestOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::settings::flags;
use shared::CoreError;

use super::{require_text, snippet, strip_code_fences, LlmChoice, LlmGateway};
use crate::prompts::{self, DEFAULT_LANGUAGE, KEYWORD_LIST_RULE, KEYWORD_MINDMAP_RULE, KEYWORD_PROMPT};

const DEFAULT_KEYWORDS: u32 = 10;
/// Upper bound on keywords per request; larger asks are clamped
pub const MAX_KEYWORDS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordFormat {
    List,
    MindMap,
}

impl KeywordFormat {
    pub fn parse(name: Option<&str>) -> Result<Self, CoreError> {
        match name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or("list") {
            "list" => Ok(KeywordFormat::List),
            "json_mindmap" => Ok(KeywordFormat::MindMap),
            other => Err(CoreError::validation(format!(
                "Unsupported output format: {}. Choose 'list' or 'json_mindmap'.",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordFormat::List => "list",
            KeywordFormat::MindMap => "json_mindmap",
        }
    }

    fn tokens_per_keyword(&self) -> u32 {
        match self {
            KeywordFormat::List => 20,
            KeywordFormat::MindMap => 50,
        }
    }
}

/// One concept in a mind map; children nest to any depth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MindMapNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MindMapNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MindMap {
    pub topic: String,
    pub nodes: Vec<MindMapNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Keywords {
    List(Vec<String>),
    MindMap(MindMap),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordRequest {
    pub text: String,
    #[serde(default)]
    pub num_keywords: Option<u32>,
    #[serde(default)]
    pub language: Option<String>,
    /// `list` (default) or `json_mindmap`
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(flatten)]
    pub llm: LlmChoice,
}

/// Parses and shape-checks a model response for `format`.
pub fn parse_keywords(raw: &str, format: KeywordFormat) -> Result<Keywords, CoreError> {
    let parse_error = |detail: &str| {
        CoreError::Parse(format!(
            "Failed to parse keywords from LLM response ({}). Raw response snippet: {}",
            detail,
            snippet(raw, 300)
        ))
    };

    let value: Value =
        serde_json::from_str(&strip_code_fences(raw)).map_err(|_| parse_error("not valid JSON"))?;
    match format {
        KeywordFormat::List => serde_json::from_value(value)
            .map(Keywords::List)
            .map_err(|_| parse_error("expected an array of strings")),
        KeywordFormat::MindMap => {
            let map: MindMap = serde_json::from_value(value)
                .map_err(|_| parse_error("expected a topic and a nodes array"))?;
            if map.topic.trim().is_empty() {
                return Err(parse_error("mind map topic is empty"));
            }
            Ok(Keywords::MindMap(map))
        }
    }
}

pub async fn extract_keywords(
    gateway: &LlmGateway,
    request: KeywordRequest,
) -> Result<Keywords, CoreError> {
    require_text(&request.text, "Text content for keyword extraction cannot be empty.")?;
    let format = KeywordFormat::parse(request.output_format.as_deref())?;
    let settings = gateway.require_feature(flags::KEYWORDS).await?;
    let provider = LlmGateway::resolve_provider(request.llm.provider.as_deref(), &settings)?;

    let count = request
        .num_keywords
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_KEYWORDS)
        .min(MAX_KEYWORDS);
    let language = request
        .language
        .as_deref()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or(DEFAULT_LANGUAGE);

    let mut system = KEYWORD_PROMPT.system.to_string();
    let prompt = match request.custom_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(template) => {
            let count_text = count.to_string();
            prompts::fill_custom(
                template,
                &[
                    ("text", request.text.as_str()),
                    ("num_keywords", count_text.as_str()),
                    ("language", language),
                    ("output_format", format.as_str()),
                ],
            )
        }
        None => match format {
            KeywordFormat::List => {
                system.push_str(KEYWORD_LIST_RULE);
                prompts::keyword_list_prompt(&request.text, count, language)
            }
            KeywordFormat::MindMap => {
                system.push_str(KEYWORD_MINDMAP_RULE);
                prompts::keyword_mindmap_prompt(&request.text, count, language)
            }
        },
    };

    let options = RequestOptions {
        model: request.llm.model.clone(),
        max_tokens: Some(
            request
                .llm
                .max_tokens
                .unwrap_or(format.tokens_per_keyword() * count),
        ),
        temperature: Some(KEYWORD_PROMPT.temperature),
        system_prompt: Some(system),
        ..Default::default()
    };

    let raw = gateway
        .complete(
            KEYWORD_PROMPT.task,
            provider,
            &prompt,
            &options,
            request.llm.api_key.as_deref(),
        )
        .await?;
    parse_keywords(&raw, format)
}
