use shared::settings::{Credentials, ProviderId, UserSettings};
use shared::CoreError;
use std::sync::Arc;
use tracing::info;

use crate::store::{load, save, KeyValueStore};

pub const USER_SETTINGS_KEY: &str = "userSettings";
pub const API_KEYS_KEY: &str = "apiKeys";

/// Typed access to user settings and per-provider API keys.
#[derive(Clone)]
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Writes default settings and empty key slots, leaving existing values alone.
    pub async fn initialize_defaults(&self) -> Result<(), CoreError> {
        if self.store.get(USER_SETTINGS_KEY).await?.is_none() {
            save(self.store.as_ref(), USER_SETTINGS_KEY, &UserSettings::default()).await?;
            info!("Default user settings initialized");
        }
        if self.store.get(API_KEYS_KEY).await?.is_none() {
            save(self.store.as_ref(), API_KEYS_KEY, &Credentials::empty_slots()).await?;
            info!("API key placeholders initialized");
        }
        Ok(())
    }

    /// Stored settings, or defaults when nothing was saved yet.
    pub async fn user_settings(&self) -> Result<UserSettings, CoreError> {
        Ok(load(self.store.as_ref(), USER_SETTINGS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_user_settings(&self, settings: &UserSettings) -> Result<(), CoreError> {
        save(self.store.as_ref(), USER_SETTINGS_KEY, settings).await
    }

    pub async fn credentials(&self) -> Result<Credentials, CoreError> {
        Ok(load(self.store.as_ref(), API_KEYS_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Key for `provider`; blank keys count as missing.
    pub async fn api_key(&self, provider: ProviderId) -> Result<Option<String>, CoreError> {
        let credentials = self.credentials().await?;
        Ok(credentials.get(provider).map(str::to_string))
    }

    /// Like [`api_key`](Self::api_key) but a missing key is a `MissingCredential` error.
    pub async fn require_api_key(&self, provider: ProviderId) -> Result<String, CoreError> {
        self.api_key(provider)
            .await?
            .ok_or_else(|| CoreError::MissingCredential {
                provider: provider.to_string(),
            })
    }

    pub async fn save_api_key(&self, provider: ProviderId, key: &str) -> Result<(), CoreError> {
        let mut credentials = self.credentials().await?;
        credentials.set(provider, key.trim());
        save(self.store.as_ref(), API_KEYS_KEY, &credentials).await?;
        info!(provider = %provider, "API key saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn settings_store() -> (Arc<MemoryStore>, SettingsStore) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), SettingsStore::new(store))
    }

    #[tokio::test]
    async fn test_initialize_defaults_is_idempotent() {
        let (raw, settings) = settings_store();
        raw.set(USER_SETTINGS_KEY, json!({"defaultProvider": "anthropic"}))
            .await
            .unwrap();

        settings.initialize_defaults().await.unwrap();
        settings.initialize_defaults().await.unwrap();

        let user = settings.user_settings().await.unwrap();
        assert_eq!(user.default_provider, ProviderId::Anthropic);
        assert_eq!(
            raw.get(API_KEYS_KEY).await.unwrap(),
            Some(json!({"anthropic": "", "gemini": "", "openai": ""}))
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_actionable() {
        let (_, settings) = settings_store();
        settings.initialize_defaults().await.unwrap();

        assert_eq!(settings.api_key(ProviderId::Gemini).await.unwrap(), None);
        let err = settings.require_api_key(ProviderId::Gemini).await.unwrap_err();
        assert!(err.to_string().contains("gemini"));

        settings.save_api_key(ProviderId::Gemini, " g-key ").await.unwrap();
        assert_eq!(
            settings.require_api_key(ProviderId::Gemini).await.unwrap(),
            "g-key"
        );
        // other slots are untouched
        assert_eq!(settings.api_key(ProviderId::OpenAI).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let (_, settings) = settings_store();
        let mut user = UserSettings::default();
        user.feature_flags.insert("qa".into(), false);
        user.selected_language = Some("French".into());
        settings.save_user_settings(&user).await.unwrap();

        let back = settings.user_settings().await.unwrap();
        assert!(!back.is_enabled("qa"));
        assert_eq!(back.selected_language.as_deref(), Some("French"));
    }
}
