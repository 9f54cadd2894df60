pub mod error;
pub mod messages;
pub mod monitor;

pub use error::CoreError;

pub mod settings {
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::fmt;
    use std::str::FromStr;
    use zeroize::Zeroize;

    use crate::error::CoreError;

    /// Feature flag names understood by the task modules
    pub mod flags {
        pub const SUMMARIZATION: &str = "summarization";
        pub const QA: &str = "qa";
        pub const FLASHCARDS: &str = "flashcards";
        pub const KEYWORDS: &str = "keywords";
        pub const TRANSLATION: &str = "translation";
        pub const PAGE_MONITORS: &str = "pageMonitors";

        pub const ALL: &[&str] = &[
            SUMMARIZATION,
            QA,
            FLASHCARDS,
            KEYWORDS,
            TRANSLATION,
            PAGE_MONITORS,
        ];
    }

    /// Upstream LLM service
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ProviderId {
        OpenAI,
        Anthropic,
        Gemini,
    }

    impl ProviderId {
        pub const ALL: [ProviderId; 3] = [ProviderId::OpenAI, ProviderId::Anthropic, ProviderId::Gemini];

        pub fn as_str(&self) -> &'static str {
            match self {
                ProviderId::OpenAI => "openai",
                ProviderId::Anthropic => "anthropic",
                ProviderId::Gemini => "gemini",
            }
        }

        pub fn display_name(&self) -> &'static str {
            match self {
                ProviderId::OpenAI => "OpenAI",
                ProviderId::Anthropic => "Anthropic",
                ProviderId::Gemini => "Gemini",
            }
        }
    }

    impl fmt::Display for ProviderId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    impl FromStr for ProviderId {
        type Err = CoreError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim() {
                "openai" => Ok(ProviderId::OpenAI),
                "anthropic" => Ok(ProviderId::Anthropic),
                "gemini" => Ok(ProviderId::Gemini),
                other => Err(CoreError::UnsupportedProvider(other.to_string())),
            }
        }
    }

    /// User preferences persisted under the `userSettings` key
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct UserSettings {
        pub default_provider: ProviderId,
        #[serde(default)]
        pub feature_flags: BTreeMap<String, bool>,
        /// Language used to fill `{{language}}` in prompt templates
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub selected_language: Option<String>,
    }

    impl UserSettings {
        /// Flags that were never written count as enabled.
        pub fn is_enabled(&self, flag: &str) -> bool {
            self.feature_flags.get(flag).copied().unwrap_or(true)
        }
    }

    impl Default for UserSettings {
        fn default() -> Self {
            Self {
                default_provider: ProviderId::OpenAI,
                feature_flags: flags::ALL.iter().map(|f| (f.to_string(), true)).collect(),
                selected_language: None,
            }
        }
    }

    /// API keys per provider, persisted under the `apiKeys` key.
    ///
    /// `Debug` only reports which providers have a key. Values are wiped on drop.
    #[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Credentials(BTreeMap<String, String>);

    impl Credentials {
        /// One empty slot per known provider, as written on first run.
        pub fn empty_slots() -> Self {
            Self(
                ProviderId::ALL
                    .iter()
                    .map(|p| (p.as_str().to_string(), String::new()))
                    .collect(),
            )
        }

        /// Returns the key for `provider`, treating blank strings as missing
        pub fn get(&self, provider: ProviderId) -> Option<&str> {
            self.0
                .get(provider.as_str())
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
        }

        pub fn set(&mut self, provider: ProviderId, key: impl Into<String>) {
            if let Some(mut old) = self.0.insert(provider.as_str().to_string(), key.into()) {
                old.zeroize();
            }
        }

        pub fn configured(&self) -> Vec<ProviderId> {
            ProviderId::ALL
                .into_iter()
                .filter(|p| self.get(*p).is_some())
                .collect()
        }
    }

    impl fmt::Debug for Credentials {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Credentials")
                .field("configured", &self.configured())
                .finish()
        }
    }

    impl Drop for Credentials {
        fn drop(&mut self) {
            for value in self.0.values_mut() {
                value.zeroize();
            }
        }
    }
}

pub mod agent_api {
    use serde::{Deserialize, Serialize};

    use crate::error::CoreError;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: String, // "system" | "user" | "assistant"
        pub content: String,
    }

    impl ChatMessage {
        pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
            Self {
                role: role.into(),
                content: content.into(),
            }
        }

        pub fn user(content: impl Into<String>) -> Self {
            Self::new("user", content)
        }

        pub fn assistant(content: impl Into<String>) -> Self {
            Self::new("assistant", content)
        }
    }

    /// Outcome of a single LLM call as reported to UI surfaces:
    /// `{ok: true, text}` or `{ok: false, errorKind, message}`.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LlmResult {
        pub ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub error_kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub message: Option<String>,
    }

    impl LlmResult {
        pub fn ok(text: impl Into<String>) -> Self {
            Self {
                ok: true,
                text: Some(text.into()),
                error_kind: None,
                message: None,
            }
        }

        pub fn err(error: &CoreError) -> Self {
            Self {
                ok: false,
                text: None,
                error_kind: Some(error.kind().to_string()),
                message: Some(error.to_string()),
            }
        }
    }

    impl From<Result<String, CoreError>> for LlmResult {
        fn from(result: Result<String, CoreError>) -> Self {
            match result {
                Ok(text) => LlmResult::ok(text),
                Err(e) => LlmResult::err(&e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::agent_api::LlmResult;
    use super::settings::{Credentials, ProviderId, UserSettings};
    use super::CoreError;

    #[test]
    fn test_provider_id_parse() {
        assert_eq!("openai".parse::<ProviderId>().unwrap(), ProviderId::OpenAI);
        assert_eq!("gemini".parse::<ProviderId>().unwrap(), ProviderId::Gemini);
        let err = "mistral".parse::<ProviderId>().unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedProvider(ref p) if p == "mistral"));
    }

    #[test]
    fn test_provider_id_serde_names() {
        let json = serde_json::to_string(&ProviderId::OpenAI).unwrap();
        assert_eq!(json, "\"openai\"");
    }

    #[test]
    fn test_user_settings_defaults() {
        let settings = UserSettings::default();
        assert_eq!(settings.default_provider, ProviderId::OpenAI);
        assert!(settings.is_enabled("pageMonitors"));
        assert!(settings.is_enabled("never-written"));

        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["defaultProvider"], "openai");
        assert_eq!(json["featureFlags"]["summarization"], true);
    }

    #[test]
    fn test_credentials_blank_is_missing() {
        let mut creds = Credentials::empty_slots();
        assert_eq!(creds.get(ProviderId::Anthropic), None);
        creds.set(ProviderId::Anthropic, "sk-ant-123");
        assert_eq!(creds.get(ProviderId::Anthropic), Some("sk-ant-123"));
        assert_eq!(creds.configured(), vec![ProviderId::Anthropic]);
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let mut creds = Credentials::default();
        creds.set(ProviderId::OpenAI, "sk-secret");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("OpenAI"));
    }

    #[test]
    fn test_llm_result_shape() {
        let ok = serde_json::to_value(LlmResult::ok("hi")).unwrap();
        assert_eq!(ok, serde_json::json!({"ok": true, "text": "hi"}));

        let err = LlmResult::from(Err::<String, _>(CoreError::MissingCredential {
            provider: "gemini".into(),
        }));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["errorKind"], "missing_credential");

        let back: LlmResult = serde_json::from_value(value).unwrap();
        assert!(!back.ok);
        assert!(back.message.unwrap().contains("gemini"));
    }
}
