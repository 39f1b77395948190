use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentId, WorkspaceId};
use crate::domain::conversation::ConversationId;

pub const TOKENS_PER_CREDIT: u64 = 100;

pub fn credits_for_tokens(tokens_used: u64) -> u64 {
    tokens_used.div_ceil(TOKENS_PER_CREDIT)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub workspace_id: WorkspaceId,
    pub agent_id: AgentId,
    pub conversation_id: ConversationId,
    pub tokens_used: u64,
    pub credits_used: u64,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(
        workspace_id: WorkspaceId,
        agent_id: AgentId,
        conversation_id: ConversationId,
        tokens_used: u64,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id,
            agent_id,
            conversation_id,
            tokens_used,
            credits_used: credits_for_tokens(tokens_used),
            model: model.into(),
            created_at: Utc::now(),
        }
    }
}
