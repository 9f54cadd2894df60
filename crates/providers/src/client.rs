//! Resilient HTTP client for LLM provider endpoints.
//!
//! Retries 429 / 5xx responses and network failures with pure exponential
//! backoff. Any other non-2xx status fails immediately with the error body.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use shared::settings::ProviderId;
use shared::CoreError;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapter::{AuthStrategy, ProviderConfig};

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

/// Error bodies that are not JSON are kept up to this many characters.
const MAX_ERROR_DETAIL_CHARS: usize = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Wait before the second attempt; doubled after every retry
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

/// 429 and every 5xx are worth another try
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Outcome of a single attempt
enum Attempt {
    Done(Value),
    Retry(String),
}

#[derive(Debug, Clone)]
pub struct LlmHttpClient {
    http: Client,
    policy: RetryPolicy,
    endpoints: HashMap<ProviderId, String>,
}

impl Default for LlmHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmHttpClient {
    pub fn new() -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            policy: RetryPolicy::default(),
            endpoints: HashMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sends `provider` traffic to `url` instead of the public endpoint.
    pub fn with_endpoint(mut self, provider: ProviderId, url: impl Into<String>) -> Self {
        self.endpoints.insert(provider, url.into());
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn endpoint(&self, config: &ProviderConfig) -> String {
        self.endpoints
            .get(&config.id)
            .cloned()
            .unwrap_or_else(|| config.endpoint.to_string())
    }

    fn authorize(&self, builder: RequestBuilder, auth: AuthStrategy, credential: &str) -> RequestBuilder {
        match auth {
            AuthStrategy::Bearer => builder.bearer_auth(credential),
            AuthStrategy::ApiKeyHeader {
                key_header,
                version_header,
                version,
            } => builder
                .header(key_header, credential)
                .header(version_header, version),
            AuthStrategy::QueryParam(name) => builder.query(&[(name, credential)]),
        }
    }

    /// POSTs `body` to the provider and returns the parsed JSON response.
    ///
    /// The credential never appears in logs or error messages.
    pub async fn call(
        &self,
        provider: ProviderId,
        body: &Value,
        credential: &str,
    ) -> Result<Value, CoreError> {
        let config = ProviderConfig::for_provider(provider);
        let url = self.endpoint(config);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            debug!(provider = %provider, attempt, "Calling LLM API");

            match self.attempt(&url, config, body, credential).await? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Retry(reason) => {
                    last_error = reason;
                    if attempt == max_attempts {
                        break;
                    }
                    let delay = self.policy.backoff_after(attempt);
                    warn!(
                        provider = %provider,
                        "LLM API attempt {}/{} failed: {}, retrying in {:?}",
                        attempt,
                        max_attempts,
                        last_error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        warn!(provider = %provider, attempts = max_attempts, "Max retries reached for LLM API request");
        Err(CoreError::ExhaustedRetries {
            attempts: max_attempts,
            last_error,
        })
    }

    async fn attempt(
        &self,
        url: &str,
        config: &ProviderConfig,
        body: &Value,
        credential: &str,
    ) -> Result<Attempt, CoreError> {
        let request = self.authorize(self.http.post(url).json(body), config.auth, credential);

        let resp = match request.send().await {
            Ok(resp) => resp,
            // Strip the URL: for query-param auth it carries the key
            Err(e) => return Ok(Attempt::Retry(e.without_url().to_string())),
        };

        let status = resp.status();
        if status.is_success() {
            return match resp.json::<Value>().await {
                Ok(value) => Ok(Attempt::Done(value)),
                Err(e) => Err(CoreError::Parse(e.without_url().to_string())),
            };
        }

        if is_retryable_status(status) {
            return Ok(Attempt::Retry(format!("API request failed: {}", status.as_u16())));
        }

        let text = resp.text().await.unwrap_or_default();
        let body = error_body(&text);
        warn!(provider = %config.id, status = status.as_u16(), "LLM API rejected request");
        Err(CoreError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

/// Parsed error body, or `{"message": <truncated text>}` when it is not JSON.
fn error_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| {
        let detail: String = text.trim().chars().take(MAX_ERROR_DETAIL_CHARS).collect();
        serde_json::json!({ "message": detail })
    })
}
