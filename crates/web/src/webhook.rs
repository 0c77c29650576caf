//! Webhook notifications
//!
//! Callers may attach a webhook to a run. Every run event the webhook
//! subscribes to is POSTed as JSON; delivery failures are logged and dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{error, info};

use crate::events::{RunEvent, WebhookPayload};

pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

fn default_events() -> Vec<String> {
    ["test_started", "test_completed", "test_error"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    #[serde(default = "default_events")]
    pub events: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            events: default_events(),
            headers: None,
        }
    }

    /// Only absolute http(s) URLs are accepted
    pub fn validate(&self) -> Result<(), String> {
        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| format!("invalid webhook url '{}': {}", self.url, e))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(format!("unsupported webhook url scheme '{}'", other)),
        }
    }

    pub fn wants(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }
}

#[derive(Debug, Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookSender {
    pub fn new() -> Self {
        Self::with_timeout(WEBHOOK_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build webhook client, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self { client }
    }

    /// Deliver `event` if the webhook subscribes to it. Returns whether a
    /// request was sent and answered.
    pub async fn send(&self, config: &WebhookConfig, test_id: &str, event: &RunEvent) -> bool {
        if !config.wants(event.name()) {
            return false;
        }

        let payload = WebhookPayload::new(test_id, event);
        let mut request = self.client.post(&config.url).json(&payload);
        if let Some(headers) = &config.headers {
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        match request.send().await {
            Ok(response) => {
                info!(
                    "Webhook notification sent for test {}, event {}: {}",
                    test_id,
                    event.name(),
                    response.status()
                );
                true
            }
            Err(e) => {
                error!(
                    "Error sending webhook notification for test {}: {}",
                    test_id, e
                );
                false
            }
        }
    }
}
