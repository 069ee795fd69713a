//! Production action handlers — actually perform the side effects.
//!
//! Simulated outcomes live only in test stubs; these handlers dispatch for
//! real and report the result through the executor's outcome contract.

use async_trait::async_trait;
use std::time::Duration;

use crate::executor::{ActionHandler, ExecutionOutcome};
use crate::rules::Action;

/// HTTP webhook dispatch. Config:
/// `{"url": "...", "method": "POST", "headers": [["k","v"], ...]}`.
/// The request body carries the action name and the trigger's details payload.
pub struct WebhookHandler {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookHandler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl Default for WebhookHandler {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl ActionHandler for WebhookHandler {
    fn kind(&self) -> &str {
        "webhook"
    }

    async fn execute(&self, action: &Action, details: &serde_json::Value) -> ExecutionOutcome {
        let Some(url) = action.config["url"].as_str().filter(|u| !u.is_empty()) else {
            return ExecutionOutcome::fail("missing_url", "Webhook action has no url configured");
        };
        let method = action.config["method"].as_str().unwrap_or("POST");

        let mut req = match method.to_uppercase().as_str() {
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            "GET" => self.client.get(url),
            _ => self.client.post(url),
        };

        if let Some(headers) = action.config["headers"].as_array() {
            for pair in headers {
                if let (Some(key), Some(value)) = (pair[0].as_str(), pair[1].as_str()) {
                    req = req.header(key, value);
                }
            }
        }

        let resp = req
            .json(&serde_json::json!({
                "action": action.name,
                "details": details,
            }))
            .timeout(self.timeout)
            .send()
            .await;

        match resp {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!("✅ Webhook sent to {}: {}", url, resp.status());
                ExecutionOutcome::ok(serde_json::json!({
                    "url": url,
                    "status": resp.status().as_u16(),
                }))
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                ExecutionOutcome::fail("webhook_status", format!("Webhook error {status}: {body}"))
            }
            Err(e) => ExecutionOutcome::fail("webhook_send", format!("Webhook send failed: {e}")),
        }
    }
}

/// In-process notification: records the message through the logging layer.
/// Message resolution order: trigger details, then action config.
pub struct NotifyHandler;

#[async_trait]
impl ActionHandler for NotifyHandler {
    fn kind(&self) -> &str {
        "notify"
    }

    async fn execute(&self, action: &Action, details: &serde_json::Value) -> ExecutionOutcome {
        let message = details["message"]
            .as_str()
            .or_else(|| action.config["message"].as_str())
            .unwrap_or(&action.name)
            .to_string();

        tracing::info!("📢 [{}] {}", action.name, message);
        ExecutionOutcome::ok(serde_json::json!({ "message": message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_notify_prefers_trigger_details() {
        let action = Action::new("Daily digest", "notify", json!({"message": "from config"}));

        let outcome = NotifyHandler.execute(&action, &json!({"message": "from trigger"})).await;
        assert!(outcome.success);
        assert_eq!(outcome.output["message"], json!("from trigger"));

        let outcome = NotifyHandler.execute(&action, &json!({})).await;
        assert_eq!(outcome.output["message"], json!("from config"));
    }

    #[tokio::test]
    async fn test_webhook_requires_url() {
        let handler = WebhookHandler::default();
        let action = Action::new("No url", "webhook", json!({}));

        let outcome = handler.execute(&action, &json!({})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_code.as_deref(), Some("missing_url"));
    }

    #[tokio::test]
    async fn test_webhook_unreachable_host_is_failed_outcome() {
        let handler = WebhookHandler::new(Duration::from_millis(300));
        let action = Action::new(
            "Dead endpoint",
            "webhook",
            json!({"url": "http://127.0.0.1:1/hook"}),
        );

        let outcome = handler.execute(&action, &json!({})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_code.as_deref(), Some("webhook_send"));
    }
}
