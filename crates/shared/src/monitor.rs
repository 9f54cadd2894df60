//! Page monitor records and check results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default check interval in minutes
pub const DEFAULT_FREQUENCY_MINUTES: u32 = 60;

/// What to read from the matched element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    /// Trimmed text content
    #[default]
    Text,
    /// Inner markup
    Html,
}

/// How change alerts are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    #[default]
    Basic,
    Webhook,
}

/// Persisted watch task over a URL + selector pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: String,
    pub url: String,
    pub selector: String,
    #[serde(default)]
    pub check_type: CheckType,
    pub frequency_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Baseline for change detection; `None` until the first observation
    #[serde(default)]
    pub last_known_value: Option<String>,
    #[serde(default)]
    pub notification_type: NotificationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Monitor {
    /// User-facing label: the name if set, otherwise the id
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.id)
    }
}

/// Caller-supplied fields for an upsert. Absent fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub check_type: Option<CheckType>,
    #[serde(default)]
    pub frequency_minutes: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
    /// Value observed when the monitor was set up, used as the baseline
    #[serde(default)]
    pub initial_value: Option<String>,
    /// Explicit baseline; wins over `initial_value`
    #[serde(default)]
    pub last_known_value: Option<String>,
    #[serde(default)]
    pub notification_type: Option<NotificationType>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl MonitorConfig {
    pub fn new(id: impl Into<String>, url: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            selector: selector.into(),
            ..Default::default()
        }
    }
}

/// Outcome of one scheduled check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorCheckResult {
    pub monitor_id: String,
    pub changed: bool,
    pub previous_value: Option<String>,
    pub current_value: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_partial_json() {
        let cfg: MonitorConfig = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "url": "http://x",
            "selector": "#p",
            "checkType": "html",
            "notificationType": "webhook",
            "webhookUrl": "http://hook"
        }))
        .unwrap();
        assert_eq!(cfg.check_type, Some(CheckType::Html));
        assert_eq!(cfg.notification_type, Some(NotificationType::Webhook));
        assert_eq!(cfg.frequency_minutes, None);
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let mut monitor = Monitor {
            id: "m1".into(),
            url: "http://x".into(),
            selector: "#p".into(),
            check_type: CheckType::Text,
            frequency_minutes: DEFAULT_FREQUENCY_MINUTES,
            name: None,
            created_at: Utc::now(),
            last_checked_at: None,
            last_known_value: None,
            notification_type: NotificationType::Basic,
            webhook_url: None,
        };
        assert_eq!(monitor.display_name(), "m1");
        monitor.name = Some("Price".into());
        assert_eq!(monitor.display_name(), "Price");
    }
}
