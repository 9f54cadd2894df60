use serde_json::Value;
use shared::settings::ProviderId;
use shared::CoreError;
use tracing::info;

use crate::adapter::{extract_text, LlmRequest};
use crate::client::LlmHttpClient;

/// One LLM call end to end: adapter body, HTTP with retries, text extraction.
#[derive(Debug, Clone, Default)]
pub struct ProviderRouter {
    client: LlmHttpClient,
}

impl ProviderRouter {
    pub fn new(client: LlmHttpClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &LlmHttpClient {
        &self.client
    }

    /// Sends an already-built provider body and returns the raw response JSON.
    pub async fn send(
        &self,
        provider: ProviderId,
        body: &Value,
        credential: &str,
    ) -> Result<Value, CoreError> {
        self.client.call(provider, body, credential).await
    }

    /// Builds the body for `request`, sends it, and extracts the answer text.
    pub async fn complete(&self, request: &LlmRequest, credential: &str) -> Result<String, CoreError> {
        let body = request.to_body()?;
        let raw = self.client.call(request.provider, &body, credential).await?;
        let text = extract_text(request.provider, &raw);
        info!(provider = %request.provider, chars = text.len(), "LLM call completed");
        Ok(text)
    }
}
