use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message telling a human team that a visitor is waiting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffEmail {
    pub recipient: String,
    pub agent_name: String,
    pub workspace_name: String,
    pub conversation_link: String,
    pub visitor_details: String,
    pub summary: String,
}

impl HandoffEmail {
    pub fn subject(&self) -> String {
        format!("[{}] {} needs a human teammate", self.workspace_name, self.agent_name)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("handoff notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait HandoffNotifier: Send + Sync {
    async fn send_handoff_email(&self, email: HandoffEmail) -> Result<(), NotifyError>;
}
