//! Error taxonomy shared by every crate in the workspace.

/// Errors surfaced by the background core.
///
/// Display strings are what UI surfaces see in `{success: false, error}`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    /// Bad caller input, never retried
    #[error("{0}")]
    Validation(String),

    #[error("Unsupported LLM provider: {0}")]
    UnsupportedProvider(String),

    #[error("API key for {provider} not found. Please set it in the options page.")]
    MissingCredential { provider: String },

    /// Upstream rejected the request with a non-retryable status
    #[error("API request failed: {status}. Details: {body}")]
    Api { status: u16, body: serde_json::Value },

    #[error("Max retries reached for LLM API request ({attempts} attempts). Last error: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Offscreen worker not available: {0}")]
    Worker(String),

    #[error("{0}")]
    Fetch(String),

    #[error("{0}")]
    Surface(String),

    #[error("{0}")]
    NotApplicable(String),

    /// Local notification or webhook delivery failed
    #[error("{0}")]
    Notification(String),

    #[error("Feature '{0}' is disabled in settings")]
    FeatureDisabled(String),
}

impl CoreError {
    /// Stable identifier used in `LlmResult.errorKind` and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::UnsupportedProvider(_) => "unsupported_provider",
            CoreError::MissingCredential { .. } => "missing_credential",
            CoreError::Api { .. } => "api",
            CoreError::ExhaustedRetries { .. } => "exhausted_retries",
            CoreError::Parse(_) => "parse",
            CoreError::Storage(_) => "storage",
            CoreError::Worker(_) => "worker",
            CoreError::Fetch(_) => "fetch",
            CoreError::Surface(_) => "surface",
            CoreError::NotApplicable(_) => "not_applicable",
            CoreError::Notification(_) => "notification",
            CoreError::FeatureDisabled(_) => "feature_disabled",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    pub fn storage(message: impl std::fmt::Display) -> Self {
        CoreError::Storage(message.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credential_is_actionable() {
        let err = CoreError::MissingCredential {
            provider: "anthropic".into(),
        };
        assert_eq!(
            err.to_string(),
            "API key for anthropic not found. Please set it in the options page."
        );
        assert_eq!(err.kind(), "missing_credential");
    }

    #[test]
    fn test_api_error_carries_status_and_body() {
        let err = CoreError::Api {
            status: 401,
            body: serde_json::json!({"error": "bad key"}),
        };
        let msg = err.to_string();
        assert!(msg.contains("401"));
        assert!(msg.contains("bad key"));
    }

    #[test]
    fn test_json_error_maps_to_parse() {
        let e = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        assert_eq!(CoreError::from(e).kind(), "parse");
    }
}
