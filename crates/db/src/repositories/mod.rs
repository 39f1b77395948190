use async_trait::async_trait;
use thiserror::Error;

use parley_core::domain::agent::{AgentConfig, AgentId, Workspace, WorkspaceId};
use parley_core::domain::contact::{ContactId, ContactRecord};
use parley_core::domain::conversation::{
    ConversationId, ConversationState, ConversationStatus, Message,
};
use parley_core::domain::knowledge::{KnowledgePassage, PassageId};
use parley_core::domain::usage::UsageRecord;

pub mod agent;
pub mod contact;
pub mod conversation;
mod decode;
pub mod knowledge;
pub mod memory;
pub mod usage;

pub use agent::SqlAgentRepository;
pub use contact::SqlContactRepository;
pub use conversation::SqlConversationRepository;
pub use knowledge::SqlKnowledgeRepository;
pub use memory::{
    InMemoryAgentRepository, InMemoryContactRepository, InMemoryConversationRepository,
    InMemoryKnowledgeRepository, InMemoryUsageRepository,
};
pub use usage::SqlUsageRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn find_agent(&self, id: &AgentId) -> Result<Option<AgentConfig>, RepositoryError>;
    async fn find_workspace(&self, id: &WorkspaceId)
        -> Result<Option<Workspace>, RepositoryError>;
    async fn save_workspace(&self, workspace: Workspace) -> Result<(), RepositoryError>;
    async fn save_agent(&self, agent: AgentConfig) -> Result<(), RepositoryError>;
    /// Custom field keys declared by any agent of the workspace, sorted and deduplicated.
    async fn custom_field_keys_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<String>, RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Loads the conversation with its full message history, oldest first.
    async fn find_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationState>, RepositoryError>;
    async fn save_conversation(&self, conversation: ConversationState)
        -> Result<(), RepositoryError>;
    /// Appends one message and bumps `last_message_at`.
    async fn append_message(&self, message: Message) -> Result<(), RepositoryError>;
    async fn update_status(
        &self,
        id: &ConversationId,
        status: ConversationStatus,
    ) -> Result<(), RepositoryError>;
    async fn link_contact(
        &self,
        id: &ConversationId,
        contact_id: &ContactId,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn find_contact(&self, id: &ContactId) -> Result<Option<ContactRecord>, RepositoryError>;
    async fn save_contact(&self, contact: ContactRecord) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    async fn passages_for_agent(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<KnowledgePassage>, RepositoryError>;
    async fn save_passage(&self, passage: KnowledgePassage) -> Result<(), RepositoryError>;
    async fn store_embedding(
        &self,
        id: &PassageId,
        embedding: Vec<f32>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// Stores the usage row and decrements the workspace balance atomically. Returns the new
    /// balance, which may go negative.
    async fn record_usage(&self, record: UsageRecord) -> Result<i64, RepositoryError>;
    async fn usage_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<UsageRecord>, RepositoryError>;
}
