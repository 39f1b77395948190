//! Handoff notification delivery.

use std::time::Duration;

use async_trait::async_trait;
use parley_agent::notifier::{HandoffEmail, HandoffNotifier, NotifyError};
use reqwest::Client;
use serde_json::json;
use tracing::info;

/// Posts each handoff as JSON to a mail relay or automation webhook.
pub struct WebhookHandoffNotifier {
    client: Client,
    url: String,
}

impl WebhookHandoffNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.to_string() })
    }
}

#[async_trait]
impl HandoffNotifier for WebhookHandoffNotifier {
    async fn send_handoff_email(&self, email: HandoffEmail) -> Result<(), NotifyError> {
        let body = json!({
            "to": email.recipient,
            "subject": email.subject(),
            "agent_name": email.agent_name,
            "workspace_name": email.workspace_name,
            "conversation_link": email.conversation_link,
            "visitor_details": email.visitor_details,
            "summary": email.summary,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|error| NotifyError::Delivery(error.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Delivery(format!("webhook answered HTTP {}", response.status())));
        }
        info!(
            event_name = "system.handoff.delivered",
            recipient = %email.recipient,
            "handoff notification delivered"
        );
        Ok(())
    }
}

/// Used when no webhook is configured; the handoff is only visible in the logs.
pub struct LogHandoffNotifier;

#[async_trait]
impl HandoffNotifier for LogHandoffNotifier {
    async fn send_handoff_email(&self, email: HandoffEmail) -> Result<(), NotifyError> {
        info!(
            event_name = "system.handoff.logged",
            recipient = %email.recipient,
            subject = %email.subject(),
            conversation_link = %email.conversation_link,
            "handoff notification (no webhook configured)"
        );
        Ok(())
    }
}
