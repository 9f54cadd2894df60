//! Prompt text for the task modules.
//!
//! Each task has a fixed system prompt and a builder for the user prompt.
//! Custom templates from the UI use `{{text}}` and `{{language}}` slots.

use regex::{NoExpand, Regex};

pub const DEFAULT_LANGUAGE: &str = "English";

/// Fixed parameters for one task family
#[derive(Clone, Debug)]
pub struct TaskPrompt {
    pub task: &'static str,
    pub system: &'static str,
    pub temperature: f32,
}

pub static SUMMARY_PROMPT: TaskPrompt = TaskPrompt {
    task: "summarize",
    system: "You are an expert summarization assistant. Your goal is to provide clear, concise, and accurate summaries based on the user's length and language preferences. Output only the summary text itself.",
    temperature: 0.5,
};

pub static QA_PROMPT: TaskPrompt = TaskPrompt {
    task: "askQuestion",
    system: "You are a helpful AI assistant designed to answer questions based on provided context or general knowledge. Be concise and accurate.",
    temperature: 0.7,
};

/// Appended to the QA system prompt when page text is supplied
pub const QA_PAGE_HINT: &str =
    " Prioritize information from the provided page text if relevant to the question.";

pub static FLASHCARD_PROMPT: TaskPrompt = TaskPrompt {
    task: "generateFlashcards",
    system: "You are an AI assistant specialized in creating educational flashcards from text.\nYou MUST output the flashcards in a valid JSON array format: [{\"front\": \"question\", \"back\": \"answer\"}, ...].\nDo not include any explanatory text before or after the JSON array.",
    temperature: 0.6,
};

pub static KEYWORD_PROMPT: TaskPrompt = TaskPrompt {
    task: "extractKeywords",
    system: "You are an AI assistant specialized in extracting key information from text.\nAnalyze the provided text and identify the most important keywords, concepts, and entities.",
    temperature: 0.5,
};

/// Appended to the keyword system prompt for list output
pub const KEYWORD_LIST_RULE: &str = " You MUST output the keywords as a valid JSON array of strings: [\"keyword1\", \"keyword2\", ...]. Do not include any explanatory text before or after the JSON array.";
/// Appended to the keyword system prompt for mind map output
pub const KEYWORD_MINDMAP_RULE: &str = " You MUST output the result as a single, valid JSON object representing the mind map structure. Do not include any explanatory text before or after the JSON object.";

pub static TRANSLATE_PROMPT: TaskPrompt = TaskPrompt {
    task: "translate",
    system: "You are a professional translator. Translate faithfully, keep the original formatting, and output only the translated text.",
    temperature: 0.3,
};

pub static TEMPLATE_PROMPT: TaskPrompt = TaskPrompt {
    task: "runPromptTemplate",
    system: "You are a helpful AI assistant. Execute the user's instruction provided in the prompt.",
    temperature: 0.7,
};

/// Summary length phrase as it appears in the prompt
pub fn summary_length_phrase(length: &str) -> &'static str {
    match length {
        "short" => "a very short summary (1-2 sentences)",
        "bullets" => "a summary in bullet points",
        "paragraph" => "a summary in a single paragraph",
        _ => "a concise summary",
    }
}

pub fn summary_prompt(text: &str, length: &str, language: Option<&str>) -> String {
    let in_language = language
        .map(|lang| format!(" in {}", lang))
        .unwrap_or_default();
    format!(
        "Please provide {} of the following text{}:\n\n\"{}\"",
        summary_length_phrase(length),
        in_language,
        text
    )
}

pub fn flashcard_prompt(text: &str, count: u32, language: &str) -> String {
    format!(
        r#"Analyze the following text and generate approximately {count} flashcards from it.
Each flashcard should be in a Question/Answer format.
The language of the flashcards should be {language}.
Present the flashcards as a JSON array, where each object has a "front" (question) key and a "back" (answer) key.
For example: [{{"front": "What is the capital of France?", "back": "Paris"}}, {{"front": "Question 2?", "back": "Answer 2"}}].
Ensure the JSON is well-formed and contains only the array of flashcards.

Text to process:
---
{text}
---

JSON Output:"#
    )
}

pub fn keyword_list_prompt(text: &str, count: u32, language: &str) -> String {
    format!(
        r#"Analyze the following text in {language} and extract approximately {count} most important keywords and key phrases.
Present the result as a JSON array of strings. For example: ["keyword1", "phrase 2", "concept3"].
Ensure the JSON is well-formed and contains only the array of keywords.

Text to process:
---
{text}
---

JSON Output:"#
    )
}

pub fn keyword_mindmap_prompt(text: &str, count: u32, language: &str) -> String {
    format!(
        r#"Analyze the following text in {language} and extract the main topic and approximately {count} related key concepts, entities, and sub-topics.
Structure this information as a JSON object suitable for a mind map. The JSON should have a central "topic" string, and a "nodes" array. Each node object in the array should have a "name" (string for the concept/keyword) and optionally a "children" array (for nested concepts, following the same node structure).
For example: {{"topic": "Main Idea", "nodes": [{{"name": "Concept A", "children": [{{"name": "Sub-concept A1"}}]}}, {{"name": "Keyword B"}}]}}.
Ensure the JSON is well-formed.

Text to process:
---
{text}
---

JSON Output:"#
    )
}

pub fn translate_prompt(text: &str, target_language: &str, source_language: Option<&str>) -> String {
    let from = source_language
        .map(|lang| format!(" from {}", lang))
        .unwrap_or_default();
    format!(
        "Translate the following text{} into {}. Output only the translation.\n\n\"{}\"",
        from, target_language, text
    )
}

/// Fills `{{slot}}` placeholders in a custom task template, ignoring case.
pub fn fill_custom(template: &str, slots: &[(&str, &str)]) -> String {
    slots.iter().fold(template.to_string(), |acc, (slot, value)| {
        match Regex::new(&format!(r"(?i)\{{\{{{}\}}\}}", regex::escape(slot))) {
            Ok(re) => re.replace_all(&acc, NoExpand(value)).into_owned(),
            Err(_) => acc,
        }
    })
}
