//! Alert delivery.
//!
//! ## Implementations
//!
//! - [`SlackNotifier`] - Slack `chat.postMessage` via HTTP (reqwest)
//! - [`RecordingNotifier`] - Keeps messages in memory, for tests and dry runs

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use billwatch_core::{BillingError, Result, SlackConfig};

/// Sends a text message to a named channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message` to `channel`. Failures are
    /// [`BillingError::NotificationDelivery`].
    async fn notify(&self, channel: &str, message: &str) -> Result<()>;

    /// Notifier name for logging.
    fn name(&self) -> &str;
}

/// Slack bot posting through the Web API.
pub struct SlackNotifier {
    client: reqwest::Client,
    api_key: String,
    username: String,
    icon_emoji: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
    username: &'a str,
    icon_emoji: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackNotifier {
    pub fn from_config(config: &SlackConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(BillingError::ConfigMissingField {
                field: "slack.api_key".into(),
            });
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BillingError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            username: config.username.clone(),
            icon_emoji: config.icon_emoji.clone(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, channel: &str, message: &str) -> Result<()> {
        let body = PostMessage {
            channel,
            text: message,
            username: &self.username,
            icon_emoji: &self.icon_emoji,
        };

        debug!(channel, "posting slack message");
        let response = self
            .client
            .post(format!("{}/api/chat.postMessage", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BillingError::notification(channel, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BillingError::notification(channel, format!("{status} - {text}")));
        }

        let parsed: PostMessageResponse = response
            .json()
            .await
            .map_err(|e| BillingError::notification(channel, format!("malformed response: {e}")))?;
        if !parsed.ok {
            return Err(BillingError::notification(
                channel,
                parsed.error.unwrap_or_else(|| "unknown error".into()),
            ));
        }

        info!(channel, "slack message delivered");
        Ok(())
    }

    fn name(&self) -> &str {
        "slack"
    }
}

/// In-memory notifier.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail_with: Option<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every delivery fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_with: Some(message.into()),
        }
    }

    /// Delivered `(channel, message)` pairs, oldest first.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, channel: &str, message: &str) -> Result<()> {
        if let Some(reason) = &self.fail_with {
            return Err(BillingError::notification(channel, reason.clone()));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| BillingError::internal("recording notifier lock poisoned"))?;
        sent.push((channel.to_string(), message.to_string()));
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    fn config(server: &MockServer) -> SlackConfig {
        SlackConfig {
            api_key: "xoxb-test".into(),
            api_base_url: server.uri(),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_config_requires_api_key() {
        let result = SlackNotifier::from_config(&SlackConfig::default());
        assert!(matches!(
            result,
            Err(BillingError::ConfigMissingField { .. })
        ));
    }

    #[tokio::test]
    async fn test_slack_posts_message() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/chat.postMessage"))
            .and(matchers::header("authorization", "Bearer xoxb-test"))
            .and(matchers::body_json(json!({
                "channel": "#notifications",
                "text": "delta_cost=60.00$",
                "username": "billwatch",
                "icon_emoji": ":robot_face:"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = SlackNotifier::from_config(&config(&server)).unwrap();
        notifier
            .notify("#notifications", "delta_cost=60.00$")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_slack_ok_false_is_delivery_error() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "channel_not_found"})),
            )
            .mount(&server)
            .await;

        let notifier = SlackNotifier::from_config(&config(&server)).unwrap();
        let err = notifier.notify("#nowhere", "hi").await.unwrap_err();
        match err {
            BillingError::NotificationDelivery { channel, message } => {
                assert_eq!(channel, "#nowhere");
                assert_eq!(message, "channel_not_found");
            }
            other => panic!("expected NotificationDelivery, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slack_http_error_is_delivery_error() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let notifier = SlackNotifier::from_config(&config(&server)).unwrap();
        let err = notifier.notify("#notifications", "hi").await.unwrap_err();
        assert!(err.is_remote());
        assert!(err.to_string().contains("upstream down"));
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier.notify("#a", "one").await.unwrap();
        notifier.notify("#b", "two").await.unwrap();
        assert_eq!(
            notifier.sent(),
            vec![("#a".into(), "one".into()), ("#b".into(), "two".into())]
        );

        let failing = RecordingNotifier::failing("offline");
        assert!(failing.notify("#a", "one").await.is_err());
        assert!(failing.sent().is_empty());
    }
}
