// src/notify.rs
// Chat webhook notifier. Best-effort: failures are logged, never propagated.

use crate::config::WebhookConfig;
use crate::http::FAST_TIMEOUT;
use tracing::{debug, warn};

pub struct WebhookNotifier {
    http_client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    /// Returns None when no webhook URL is configured.
    pub fn from_config(http_client: reqwest::Client, config: &WebhookConfig) -> Option<Self> {
        config.url.as_ref()?;
        Some(Self {
            http_client,
            config: config.clone(),
        })
    }

    /// Post a text notification to the configured chat webhook.
    pub async fn send(&self, text: &str) {
        let Some(url) = self.config.url.as_deref() else {
            return;
        };

        let mut body = serde_json::json!({ "text": text });
        if let Some(space_id) = self.config.space_id.as_deref() {
            body["spaceId"] = serde_json::Value::String(space_id.to_string());
        }

        let mut request = self.http_client.post(url).timeout(FAST_TIMEOUT).json(&body);
        if let Some(key) = self.config.auth_key.as_deref() {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!("webhook notification delivered");
            }
            Ok(response) => {
                warn!(status = %response.status(), "webhook notification rejected");
            }
            Err(e) => {
                warn!("webhook notification failed: {}", e);
            }
        }
    }
}
