//! Host configuration: `host.json` in the platform config dir, then
//! `COPILOT_*` environment overrides.

use anyhow::{Context, Result};
use providers::{LlmHttpClient, RetryPolicy};
use serde::{Deserialize, Serialize};
use services::offscreen::HttpWorkerSpawner;
use shared::settings::ProviderId;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "host.json";
const STORE_FILE: &str = "storage.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostConfig {
    /// Where `storage.json` lives; platform data dir when unset
    pub data_dir: Option<PathBuf>,
    /// Native desktop notifications instead of log lines
    pub desktop_notifications: bool,
    /// Start the fetch worker at boot rather than on first use
    pub warm_worker: bool,
    pub fetch_timeout_secs: u64,
    pub user_agent: String,
    /// Per-provider endpoint replacements (proxies, local gateways)
    pub endpoints: BTreeMap<ProviderId, String>,
    pub retry: RetrySettings,
}

impl Default for HostConfig {
    fn default() -> Self {
        let worker = HttpWorkerSpawner::default();
        Self {
            data_dir: None,
            desktop_notifications: false,
            warm_worker: true,
            fetch_timeout_secs: worker.timeout.as_secs(),
            user_agent: worker.user_agent,
            endpoints: BTreeMap::new(),
            retry: RetrySettings::default(),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com.local", "YourAI Copilot", "YourAICopilot")
}

fn env_flag(value: &str) -> bool {
    let v = value.trim().to_ascii_lowercase();
    v == "1" || v == "true" || v == "yes"
}

impl HostConfig {
    /// Loads `COPILOT_CONFIG` or the default config file, then applies env overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os("COPILOT_CONFIG")
            .map(PathBuf::from)
            .or_else(|| project_dirs().map(|p| p.config_dir().join(CONFIG_FILE)));

        let mut config = match path {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("COPILOT_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(mode) = lookup("COPILOT_NOTIFY") {
            self.desktop_notifications = mode.trim().eq_ignore_ascii_case("desktop");
        }
        if let Some(warm) = lookup("COPILOT_WARM_WORKER") {
            self.warm_worker = env_flag(&warm);
        }
        if let Some(attempts) = lookup("COPILOT_MAX_ATTEMPTS").and_then(|v| v.trim().parse().ok()) {
            self.retry.max_attempts = attempts;
        }
        for provider in ProviderId::ALL {
            let key = format!("COPILOT_{}_ENDPOINT", provider.as_str().to_ascii_uppercase());
            if let Some(url) = lookup(&key).filter(|u| !u.trim().is_empty()) {
                self.endpoints.insert(provider, url);
            }
        }
    }

    /// Path of the persistent key-value file
    pub fn store_path(&self) -> PathBuf {
        let dir = self
            .data_dir
            .clone()
            .or_else(|| project_dirs().map(|p| p.data_dir().to_path_buf()))
            .unwrap_or_else(|| PathBuf::from(".copilot"));
        dir.join(STORE_FILE)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
        }
    }

    pub fn http_client(&self) -> LlmHttpClient {
        self.endpoints.iter().fold(
            LlmHttpClient::new().with_policy(self.retry_policy()),
            |client, (provider, url)| client.with_endpoint(*provider, url.clone()),
        )
    }

    pub fn worker_spawner(&self) -> HttpWorkerSpawner {
        HttpWorkerSpawner {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.fetch_timeout_secs.max(1)),
        }
    }
}
