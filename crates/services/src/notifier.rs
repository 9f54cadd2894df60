//! Change notifications: a local system notification or an outbound webhook.
//!
//! Delivery failures are logged and swallowed. A failed alert must not fail
//! the monitor check that raised it, and a failed webhook does not fall back
//! to a local notification.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use shared::monitor::{Monitor, NotificationType};
use shared::CoreError;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

/// A local notification as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemNotification {
    pub id: String,
    pub title: String,
    pub message: String,
}

/// Where local notifications end up.
#[async_trait]
pub trait SystemNotifier: Send + Sync {
    async fn show(&self, notification: &SystemNotification) -> Result<(), CoreError>;
}

/// Writes notifications to the log. Used for headless hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl SystemNotifier for LogNotifier {
    async fn show(&self, notification: &SystemNotification) -> Result<(), CoreError> {
        info!(
            id = %notification.id,
            "{}: {}",
            notification.title,
            notification.message
        );
        Ok(())
    }
}

/// Native desktop notifications via `notify-send` (Linux) or `osascript` (macOS).
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopNotifier;

#[async_trait]
impl SystemNotifier for DesktopNotifier {
    async fn show(&self, notification: &SystemNotification) -> Result<(), CoreError> {
        #[cfg(target_os = "macos")]
        let output = {
            let script = format!(
                r#"display notification "{}" with title "{}""#,
                notification.message.replace('"', r#"\""#),
                notification.title.replace('"', r#"\""#)
            );
            Command::new("osascript").args(["-e", &script]).output().await
        };

        #[cfg(not(target_os = "macos"))]
        let output = Command::new("notify-send")
            .args([notification.title.as_str(), notification.message.as_str()])
            .output()
            .await;

        command_outcome(output)
    }
}

fn command_outcome(output: std::io::Result<Output>) -> Result<(), CoreError> {
    let detail = match output {
        Ok(out) if out.status.success() => return Ok(()),
        Ok(out) => String::from_utf8_lossy(&out.stderr).trim().to_string(),
        Err(e) => e.to_string(),
    };
    Err(CoreError::Notification(format!(
        "Failed to send desktop notification: {}",
        detail
    )))
}

/// Receives change events from the monitor engine.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    /// Never fails outward.
    async fn notify(&self, monitor: &Monitor, old_value: Option<&str>, new_value: Option<&str>);
}

/// JSON body POSTed to a monitor's webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub monitor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_name: Option<String>,
    pub url: String,
    pub selector: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl WebhookPayload {
    pub fn new(monitor: &Monitor, old_value: Option<&str>, new_value: Option<&str>) -> Self {
        Self {
            monitor_id: monitor.id.clone(),
            monitor_name: monitor.name.clone(),
            url: monitor.url.clone(),
            selector: monitor.selector.clone(),
            old_value: old_value.map(str::to_string),
            new_value: new_value.map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}

/// Builds the local notification for a change.
pub fn change_notification(
    monitor: &Monitor,
    old_value: Option<&str>,
    new_value: Option<&str>,
) -> SystemNotification {
    SystemNotification {
        id: format!("monitorChange_{}_{}", monitor.id, Utc::now().timestamp_millis()),
        title: format!("Change Detected: {}", monitor.display_name()),
        message: format!(
            "The monitored element at {} has changed.\nOld: {}\nNew: {}",
            monitor.url,
            old_value.unwrap_or("(none)"),
            new_value.unwrap_or("(none)")
        ),
    }
}

pub struct NotificationDispatcher {
    system: Arc<dyn SystemNotifier>,
    http: Client,
}

impl NotificationDispatcher {
    pub fn new(system: Arc<dyn SystemNotifier>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self { system, http }
    }

    async fn send_webhook(&self, webhook_url: &str, payload: &WebhookPayload) -> Result<(), CoreError> {
        let response = self
            .http
            .post(webhook_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| CoreError::Notification(format!("Webhook error: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            let detail: String = body.chars().take(200).collect();
            Err(CoreError::Notification(format!("Webhook error: {} - {}", status, detail)))
        }
    }
}

#[async_trait]
impl ChangeNotifier for NotificationDispatcher {
    async fn notify(&self, monitor: &Monitor, old_value: Option<&str>, new_value: Option<&str>) {
        let webhook = match monitor.notification_type {
            NotificationType::Webhook => monitor
                .webhook_url
                .as_deref()
                .filter(|u| !u.trim().is_empty()),
            NotificationType::Basic => None,
        };

        if let Some(webhook_url) = webhook {
            let payload = WebhookPayload::new(monitor, old_value, new_value);
            match self.send_webhook(webhook_url, &payload).await {
                Ok(()) => info!(monitor = %monitor.id, "Webhook notification sent"),
                Err(e) => error!(monitor = %monitor.id, "Failed to send webhook: {}", e),
            }
            return;
        }

        let notification = change_notification(monitor, old_value, new_value);
        match self.system.show(&notification).await {
            Ok(()) => info!(monitor = %monitor.id, "Basic notification created"),
            Err(e) => warn!(monitor = %monitor.id, "Failed to show notification: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use shared::monitor::CheckType;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingNotifier {
        shown: Mutex<Vec<SystemNotification>>,
    }

    #[async_trait]
    impl SystemNotifier for RecordingNotifier {
        async fn show(&self, notification: &SystemNotification) -> Result<(), CoreError> {
            self.shown.lock().push(notification.clone());
            Ok(())
        }
    }

    fn monitor(notification_type: NotificationType, webhook_url: Option<String>) -> Monitor {
        Monitor {
            id: "m1".into(),
            url: "http://shop.test/item".into(),
            selector: "#price".into(),
            check_type: CheckType::Text,
            frequency_minutes: 60,
            name: Some("Item price".into()),
            created_at: Utc::now(),
            last_checked_at: None,
            last_known_value: None,
            notification_type,
            webhook_url,
        }
    }

    #[tokio::test]
    async fn test_basic_notification_names_monitor() {
        let recorder = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::new(recorder.clone());

        dispatcher
            .notify(&monitor(NotificationType::Basic, None), Some("$10"), Some("$9"))
            .await;

        let shown = recorder.shown.lock();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].title, "Change Detected: Item price");
        assert!(shown[0].message.contains("Old: $10\nNew: $9"));
        assert!(shown[0].id.starts_with("monitorChange_m1_"));
    }

    #[tokio::test]
    async fn test_webhook_receives_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({
                "monitorId": "m1",
                "monitorName": "Item price",
                "url": "http://shop.test/item",
                "selector": "#price",
                "oldValue": null,
                "newValue": "$10"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let recorder = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::new(recorder.clone());
        let m = monitor(NotificationType::Webhook, Some(format!("{}/hook", server.uri())));
        dispatcher.notify(&m, None, Some("$10")).await;

        assert!(recorder.shown.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_webhook_does_not_fall_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let recorder = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::new(recorder.clone());
        let m = monitor(NotificationType::Webhook, Some(server.uri()));
        dispatcher.notify(&m, Some("a"), Some("b")).await;

        // unreachable endpoint is swallowed as well
        let dead = monitor(NotificationType::Webhook, Some("http://127.0.0.1:1/hook".into()));
        dispatcher.notify(&dead, Some("a"), Some("b")).await;

        assert!(recorder.shown.lock().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_type_without_url_uses_basic() {
        let recorder = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::new(recorder.clone());
        dispatcher
            .notify(&monitor(NotificationType::Webhook, None), None, Some("x"))
            .await;
        assert_eq!(recorder.shown.lock().len(), 1);
    }

    #[test]
    fn test_failed_notifier_command_is_a_notification_error() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "notify-send not found");
        let err = command_outcome(Err(missing)).unwrap_err();
        assert_eq!(err.kind(), "notification");
        assert_eq!(
            err.to_string(),
            "Failed to send desktop notification: notify-send not found"
        );
    }

    #[tokio::test]
    async fn test_webhook_rejection_is_a_notification_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let dispatcher = NotificationDispatcher::new(Arc::new(RecordingNotifier::default()));
        let m = monitor(NotificationType::Webhook, Some(server.uri()));
        let err = dispatcher
            .send_webhook(&server.uri(), &WebhookPayload::new(&m, None, Some("x")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "notification");
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("bad gateway"));
    }
}
