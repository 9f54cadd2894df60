//! Message router: the single entry point for UI surfaces.
//!
//! A request names an `action` and carries `data`. Every handler error is
//! mapped to `{success: false, error}`; nothing escapes unformatted.
//! Requests addressed to another target (e.g. `offscreen`) get no answer.

use serde::Deserialize;
use serde_json::{json, Value};
use shared::agent_api::LlmResult;
use shared::messages::{RequestMessage, ResponseEnvelope};
use shared::monitor::{CheckType, MonitorConfig};
use shared::settings::{flags, ProviderId, UserSettings};
use shared::CoreError;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use providers::RequestOptions;
use services::{ElementFetcher, KeyValueStore, MonitorEngine};

use crate::surface::{
    is_video_watch_url, ActiveSurface, SurfaceHost, NOT_A_VIDEO_PAGE, NO_ACTIVE_SURFACE,
    TRANSCRIPT_FAILED,
};
use crate::tasks::prompt_template::{PromptContext, TemplateRequest};
use crate::tasks::{self, LlmGateway};

/// Action names understood by the router
pub mod actions {
    pub const CALL_LLM: &str = "callLLM";
    pub const CACHE_DATA: &str = "cacheData";
    pub const GET_CACHED_DATA: &str = "getCachedData";
    pub const FETCH_PAGE_ELEMENT: &str = "fetchPageElementForMonitor";
    pub const EXTRACT_PAGE_CONTENT: &str = "extractPageContent";
    pub const GET_VIDEO_TRANSCRIPT: &str = "getYouTubeTranscript";

    pub const GET_SETTINGS: &str = "getSettings";
    pub const SAVE_SETTINGS: &str = "saveSettings";
    pub const SAVE_API_KEY: &str = "saveApiKey";

    pub const UPSERT_MONITOR: &str = "upsertMonitor";
    pub const DELETE_MONITOR: &str = "deleteMonitor";
    pub const GET_MONITOR: &str = "getMonitor";
    pub const LIST_MONITORS: &str = "listMonitors";
    pub const CHECK_MONITOR: &str = "checkMonitor";

    pub const SUMMARIZE: &str = "summarize";
    pub const ASK_QUESTION: &str = "askQuestion";
    pub const GENERATE_FLASHCARDS: &str = "generateFlashcards";
    pub const EXTRACT_KEYWORDS: &str = "extractKeywords";
    pub const TRANSLATE: &str = "translate";
    pub const RUN_PROMPT_TEMPLATE: &str = "runPromptTemplate";
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallLlmData {
    #[serde(default)]
    provider: Option<String>,
    /// Pre-built provider body, sent as is
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    options: RequestOptions,
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CacheEntry {
    key: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct CacheLookup {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ElementQuery {
    url: String,
    selector: String,
    #[serde(default)]
    check_type: CheckType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyUpdate {
    provider: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct MonitorId {
    id: String,
}

/// Routes requests to storage, providers, the fetch worker, monitors and tasks.
pub struct MessageRouter {
    store: Arc<dyn KeyValueStore>,
    gateway: LlmGateway,
    fetcher: Arc<dyn ElementFetcher>,
    monitors: Arc<MonitorEngine>,
    surfaces: Arc<dyn SurfaceHost>,
}

impl MessageRouter {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        gateway: LlmGateway,
        fetcher: Arc<dyn ElementFetcher>,
        monitors: Arc<MonitorEngine>,
        surfaces: Arc<dyn SurfaceHost>,
    ) -> Self {
        Self {
            store,
            gateway,
            fetcher,
            monitors,
            surfaces,
        }
    }

    pub fn monitors(&self) -> &Arc<MonitorEngine> {
        &self.monitors
    }

    /// Handles one request. `None` means the request was not for us.
    pub async fn dispatch(&self, request: RequestMessage) -> Option<ResponseEnvelope> {
        if !request.is_for_background() {
            debug!(
                action = %request.action,
                target = ?request.target,
                "Ignoring message for another target"
            );
            return None;
        }

        let result = self.route(&request).await;
        let envelope = match result {
            Ok(Some(data)) => ResponseEnvelope::ok(data),
            Ok(None) => ResponseEnvelope::ok_empty(),
            Err(e) => {
                warn!(action = %request.action, kind = e.kind(), "Request failed: {}", e);
                ResponseEnvelope::err(e.to_string())
            }
        };
        Some(envelope.with_request_id(request.request_id))
    }

    /// Dispatches on a separate task. The caller gets the answer through
    /// the returned receiver and is free to keep accepting requests.
    ///
    /// A handler that panics still produces an error answer.
    pub fn submit(self: &Arc<Self>, request: RequestMessage) -> oneshot::Receiver<Option<ResponseEnvelope>> {
        let (tx, rx) = oneshot::channel();
        let router = Arc::clone(self);
        let action = request.action.clone();
        let request_id = request.request_id.clone();
        let answered = request.is_for_background();

        let handler = tokio::spawn(async move { router.dispatch(request).await });
        tokio::spawn(async move {
            let response = match handler.await {
                Ok(response) => response,
                Err(e) => {
                    error!(action = %action, "Request handler died: {}", e);
                    answered.then(|| {
                        ResponseEnvelope::err(format!("Internal error while handling {}", action))
                            .with_request_id(request_id)
                    })
                }
            };
            // receiver may have gone away; nothing to do then
            let _ = tx.send(response);
        });
        rx
    }

    async fn route(&self, request: &RequestMessage) -> Result<Option<Value>, CoreError> {
        debug!(action = %request.action, "Routing request");
        match request.action.as_str() {
            actions::CALL_LLM => self.call_llm(request.payload()?).await,
            actions::CACHE_DATA => self.cache_data(request.payload()?).await,
            actions::GET_CACHED_DATA => Ok(self.get_cached_data(request.payload()?).await),
            actions::FETCH_PAGE_ELEMENT => self.fetch_page_element(request.payload()?).await,
            actions::EXTRACT_PAGE_CONTENT => self.extract_page_content().await,
            actions::GET_VIDEO_TRANSCRIPT => self.video_transcript().await,

            actions::GET_SETTINGS => self.get_settings().await,
            actions::SAVE_SETTINGS => self.save_settings(request.payload()?).await,
            actions::SAVE_API_KEY => self.save_api_key(request.payload()?).await,

            actions::UPSERT_MONITOR => self.upsert_monitor(request.payload()?).await,
            actions::DELETE_MONITOR => {
                let MonitorId { id } = request.payload()?;
                let deleted = self.monitors.delete(&id).await?;
                Ok(Some(json!({ "deleted": deleted })))
            }
            actions::GET_MONITOR => {
                let MonitorId { id } = request.payload()?;
                Ok(Some(serde_json::to_value(self.monitors.get(&id).await?)?))
            }
            actions::LIST_MONITORS => Ok(Some(serde_json::to_value(self.monitors.list().await?)?)),
            actions::CHECK_MONITOR => {
                let MonitorId { id } = request.payload()?;
                Ok(Some(serde_json::to_value(self.monitors.check(&id).await?)?))
            }

            actions::SUMMARIZE => {
                let text = tasks::summarizer::summarize(&self.gateway, request.payload()?).await?;
                text_reply(text)
            }
            actions::ASK_QUESTION => {
                let text = tasks::qa::ask_question(&self.gateway, request.payload()?).await?;
                text_reply(text)
            }
            actions::GENERATE_FLASHCARDS => {
                let cards =
                    tasks::flashcards::generate_flashcards(&self.gateway, request.payload()?).await?;
                Ok(Some(json!({ "flashcards": cards })))
            }
            actions::EXTRACT_KEYWORDS => {
                let keywords =
                    tasks::keywords::extract_keywords(&self.gateway, request.payload()?).await?;
                Ok(Some(json!({ "keywords": keywords })))
            }
            actions::TRANSLATE => {
                let text = tasks::translate::translate(&self.gateway, request.payload()?).await?;
                text_reply(text)
            }
            actions::RUN_PROMPT_TEMPLATE => self.run_prompt_template(request.payload()?).await,

            other => Err(CoreError::validation(format!("Unknown action: {}", other))),
        }
    }

    async fn call_llm(&self, data: CallLlmData) -> Result<Option<Value>, CoreError> {
        let settings = self.gateway.settings().user_settings().await?;
        let provider = LlmGateway::resolve_provider(data.provider.as_deref(), &settings)?;

        if let Some(body) = data.body {
            let credential = self
                .gateway
                .credential(provider, data.api_key.as_deref())
                .await?;
            let raw = self
                .gateway
                .providers()
                .send(provider, &body, &credential)
                .await?;
            return Ok(Some(raw));
        }

        let prompt = data
            .prompt
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| CoreError::validation("callLLM requires either 'body' or 'prompt'."))?;
        let text = self
            .gateway
            .complete(
                actions::CALL_LLM,
                provider,
                &prompt,
                &data.options,
                data.api_key.as_deref(),
            )
            .await?;
        text_reply(text)
    }

    async fn cache_data(&self, entry: CacheEntry) -> Result<Option<Value>, CoreError> {
        if entry.key.trim().is_empty() {
            return Err(CoreError::validation("A non-empty key is required for cacheData."));
        }
        self.store.set(&entry.key, entry.value).await?;
        debug!(key = %entry.key, "Data cached");
        Ok(None)
    }

    /// Read failures degrade to an empty answer.
    async fn get_cached_data(&self, lookup: CacheLookup) -> Option<Value> {
        match self.store.get(&lookup.key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %lookup.key, "Cache read failed: {}", e);
                None
            }
        }
    }

    async fn fetch_page_element(&self, query: ElementQuery) -> Result<Option<Value>, CoreError> {
        let content = self
            .fetcher
            .fetch_element(&query.url, &query.selector, query.check_type)
            .await?;
        Ok(Some(content.map_or(Value::Null, Value::String)))
    }

    async fn active_surface(&self) -> Result<ActiveSurface, CoreError> {
        self.surfaces
            .active_surface()
            .await
            .ok_or_else(|| CoreError::Surface(NO_ACTIVE_SURFACE.to_string()))
    }

    async fn extract_page_content(&self) -> Result<Option<Value>, CoreError> {
        let surface = self.active_surface().await?;
        let content = self.surfaces.extract_content(&surface).await?;
        Ok(Some(serde_json::to_value(content)?))
    }

    async fn video_transcript(&self) -> Result<Option<Value>, CoreError> {
        let surface = self
            .surfaces
            .active_surface()
            .await
            .filter(|s| is_video_watch_url(&s.url))
            .ok_or_else(|| CoreError::NotApplicable(NOT_A_VIDEO_PAGE.to_string()))?;

        match self.surfaces.request_transcript(&surface).await {
            Ok(transcript) if !transcript.trim().is_empty() => Ok(Some(Value::String(transcript))),
            Ok(_) => Err(CoreError::Surface(TRANSCRIPT_FAILED.to_string())),
            Err(e) => {
                warn!(url = %surface.url, "Transcript request failed: {}", e);
                Err(CoreError::Surface(TRANSCRIPT_FAILED.to_string()))
            }
        }
    }

    /// Settings plus the providers that have a key. Keys themselves never leave.
    async fn get_settings(&self) -> Result<Option<Value>, CoreError> {
        let settings = self.gateway.settings();
        let user = settings.user_settings().await?;
        let configured = settings.credentials().await?.configured();
        Ok(Some(json!({
            "settings": user,
            "configuredProviders": configured,
        })))
    }

    async fn save_settings(&self, user: UserSettings) -> Result<Option<Value>, CoreError> {
        self.gateway.settings().save_user_settings(&user).await?;
        info!(provider = %user.default_provider, "User settings saved");
        Ok(Some(serde_json::to_value(user)?))
    }

    async fn save_api_key(&self, update: ApiKeyUpdate) -> Result<Option<Value>, CoreError> {
        let provider: ProviderId = update.provider.parse()?;
        self.gateway
            .settings()
            .save_api_key(provider, &update.api_key)
            .await?;
        Ok(None)
    }

    async fn upsert_monitor(&self, config: MonitorConfig) -> Result<Option<Value>, CoreError> {
        self.gateway.require_feature(flags::PAGE_MONITORS).await?;
        let monitor = self.monitors.upsert(config).await?;
        Ok(Some(serde_json::to_value(monitor)?))
    }

    async fn run_prompt_template(&self, mut request: TemplateRequest) -> Result<Option<Value>, CoreError> {
        if request.context.is_none() {
            request.context = Some(self.gather_prompt_context().await);
        }
        let text = tasks::prompt_template::run_template(&self.gateway, request).await?;
        text_reply(text)
    }

    /// Best-effort context from the active surface; missing parts stay empty.
    async fn gather_prompt_context(&self) -> PromptContext {
        let mut context = PromptContext::default();
        let Some(surface) = self.surfaces.active_surface().await else {
            return context;
        };

        match self.surfaces.extract_content(&surface).await {
            Ok(content) => {
                context.page_text = content.text;
                context.page_url = content.url;
            }
            Err(e) => warn!("Could not read page for prompt context: {}", e),
        }
        if context.page_url.is_empty() {
            context.page_url = surface.url.clone();
        }

        match self.surfaces.selected_text(&surface).await {
            Ok(Some(selection)) => context.selected_text = selection,
            Ok(None) => {}
            Err(e) => warn!("Could not read selection for prompt context: {}", e),
        }

        if is_video_watch_url(&context.page_url) {
            match self.surfaces.request_transcript(&surface).await {
                Ok(transcript) => context.youtube_transcript = transcript,
                Err(e) => warn!("Could not read transcript for prompt context: {}", e),
            }
        }
        context
    }
}

fn text_reply(text: String) -> Result<Option<Value>, CoreError> {
    Ok(Some(serde_json::to_value(LlmResult::ok(text))?))
}
