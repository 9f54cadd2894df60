//! AI task modules built on top of a single LLM call.
//!
//! Every task resolves its provider and credential through [`LlmGateway`],
//! checks its feature flag, builds a prompt, and post-processes the text.

pub mod flashcards;
pub mod keywords;
pub mod prompt_template;
pub mod qa;
pub mod summarizer;
pub mod translate;

use providers::{LlmRequest, ProviderRouter, RequestOptions};
use regex::Regex;
use serde::Deserialize;
use services::SettingsStore;
use shared::settings::{ProviderId, UserSettings};
use shared::CoreError;
use std::sync::LazyLock;
use tracing::{debug, info};
use zeroize::Zeroizing;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```(?:json)?\s*|\s*```$").expect("fence pattern is valid"));

/// Provider selection shared by every task request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmChoice {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the stored key for this call only
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default, alias = "max_tokens")]
    pub max_tokens: Option<u32>,
}

/// Settings, key store and provider router as one unit.
#[derive(Clone)]
pub struct LlmGateway {
    settings: SettingsStore,
    providers: ProviderRouter,
}

impl LlmGateway {
    pub fn new(settings: SettingsStore, providers: ProviderRouter) -> Self {
        Self {
            settings,
            providers,
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn providers(&self) -> &ProviderRouter {
        &self.providers
    }

    /// Loads settings and fails with `FeatureDisabled` when `flag` is off.
    pub async fn require_feature(&self, flag: &str) -> Result<UserSettings, CoreError> {
        let settings = self.settings.user_settings().await?;
        if !settings.is_enabled(flag) {
            debug!(flag, "Task rejected, feature disabled");
            return Err(CoreError::FeatureDisabled(flag.to_string()));
        }
        Ok(settings)
    }

    /// The explicit provider if one is named, else the user's default.
    pub fn resolve_provider(
        explicit: Option<&str>,
        settings: &UserSettings,
    ) -> Result<ProviderId, CoreError> {
        match explicit.map(str::trim).filter(|p| !p.is_empty()) {
            Some(name) => name.parse(),
            None => Ok(settings.default_provider),
        }
    }

    /// A per-call key wins over the stored one.
    pub async fn credential(
        &self,
        provider: ProviderId,
        override_key: Option<&str>,
    ) -> Result<Zeroizing<String>, CoreError> {
        match override_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => Ok(Zeroizing::new(key.to_string())),
            None => Ok(Zeroizing::new(self.settings.require_api_key(provider).await?)),
        }
    }

    /// One completion: adapter body, retrying HTTP, text extraction.
    pub async fn complete(
        &self,
        task: &str,
        provider: ProviderId,
        prompt: &str,
        options: &RequestOptions,
        override_key: Option<&str>,
    ) -> Result<String, CoreError> {
        let credential = self.credential(provider, override_key).await?;
        let request = LlmRequest::new(provider, prompt, options);
        info!(
            task,
            provider = %provider,
            model = request.model_or_default(),
            prompt_chars = request.prompt.len(),
            "Running LLM task"
        );
        self.providers.complete(&request, &credential).await
    }
}

/// Drops a surrounding Markdown code fence (```json ... ```).
pub fn strip_code_fences(raw: &str) -> String {
    CODE_FENCE.replace_all(raw.trim(), "").into_owned()
}

/// First `max_chars` characters of `text`
pub(crate) fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

pub(crate) fn require_text(text: &str, message: &str) -> Result<(), CoreError> {
    if text.trim().is_empty() {
        Err(CoreError::validation(message))
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use providers::{LlmHttpClient, RetryPolicy};
    use serde_json::{json, Value};
    use services::{KeyValueStore, MemoryStore};
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::MockServer;

    /// Gateway whose OpenAI endpoint is `server` and whose stored key is `sk-test`.
    pub async fn gateway(server: &MockServer) -> (Arc<MemoryStore>, LlmGateway) {
        let store = Arc::new(MemoryStore::new());
        let settings = SettingsStore::new(store.clone());
        settings.initialize_defaults().await.unwrap();
        settings
            .save_api_key(ProviderId::OpenAI, "sk-test")
            .await
            .unwrap();

        let client = LlmHttpClient::new()
            .with_policy(RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(5),
            })
            .with_endpoint(ProviderId::OpenAI, format!("{}/v1/chat/completions", server.uri()));
        (store, LlmGateway::new(settings, ProviderRouter::new(client)))
    }

    pub fn openai_reply(text: &str) -> Value {
        json!({"choices": [{"message": {"role": "assistant", "content": text}}]})
    }

    pub async fn disable(store: &MemoryStore, flag: &str) {
        let mut settings: Value = store.get("userSettings").await.unwrap().unwrap();
        settings["featureFlags"][flag] = Value::Bool(false);
        store.set("userSettings", settings).await.unwrap();
    }
}
