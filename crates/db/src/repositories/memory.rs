use std::collections::HashMap;

use tokio::sync::RwLock;

use parley_core::domain::agent::{AgentConfig, AgentId, Workspace, WorkspaceId};
use parley_core::domain::contact::{ContactId, ContactRecord};
use parley_core::domain::conversation::{
    ConversationId, ConversationState, ConversationStatus, Message,
};
use parley_core::domain::knowledge::{KnowledgePassage, PassageId};
use parley_core::domain::usage::UsageRecord;

use super::{
    AgentRepository, ContactRepository, ConversationRepository, KnowledgeRepository,
    RepositoryError, UsageRepository,
};

#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<String, AgentConfig>>,
    workspaces: RwLock<HashMap<String, Workspace>>,
}

#[async_trait::async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn find_agent(&self, id: &AgentId) -> Result<Option<AgentConfig>, RepositoryError> {
        let agents = self.agents.read().await;
        Ok(agents.get(&id.0).cloned())
    }

    async fn find_workspace(
        &self,
        id: &WorkspaceId,
    ) -> Result<Option<Workspace>, RepositoryError> {
        let workspaces = self.workspaces.read().await;
        Ok(workspaces.get(&id.0).cloned())
    }

    async fn save_workspace(&self, workspace: Workspace) -> Result<(), RepositoryError> {
        let mut workspaces = self.workspaces.write().await;
        workspaces.insert(workspace.id.0.clone(), workspace);
        Ok(())
    }

    async fn save_agent(&self, agent: AgentConfig) -> Result<(), RepositoryError> {
        let mut agents = self.agents.write().await;
        agents.insert(agent.id.0.clone(), agent);
        Ok(())
    }

    async fn custom_field_keys_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<String>, RepositoryError> {
        let agents = self.agents.read().await;
        let mut keys: Vec<String> = agents
            .values()
            .filter(|agent| agent.workspace_id == *workspace_id)
            .flat_map(|agent| agent.custom_fields.iter().map(|field| field.key.clone()))
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, ConversationState>>,
}

impl InMemoryConversationRepository {
    async fn modify<F>(&self, id: &ConversationId, change: F) -> Result<(), RepositoryError>
    where
        F: FnOnce(&mut ConversationState) + Send,
    {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(&id.0)
            .ok_or_else(|| RepositoryError::NotFound { entity: "conversation", id: id.0.clone() })?;
        change(conversation);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(&id.0).cloned())
    }

    async fn save_conversation(
        &self,
        conversation: ConversationState,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        conversations.insert(conversation.id.0.clone(), conversation);
        Ok(())
    }

    async fn append_message(&self, message: Message) -> Result<(), RepositoryError> {
        let id = message.conversation_id.clone();
        self.modify(&id, move |conversation| {
            conversation.last_message_at = Some(message.created_at);
            conversation.messages.push(message);
        })
        .await
    }

    async fn update_status(
        &self,
        id: &ConversationId,
        status: ConversationStatus,
    ) -> Result<(), RepositoryError> {
        self.modify(id, |conversation| conversation.status = status).await
    }

    async fn link_contact(
        &self,
        id: &ConversationId,
        contact_id: &ContactId,
    ) -> Result<(), RepositoryError> {
        let contact_id = contact_id.clone();
        self.modify(id, move |conversation| conversation.contact_id = Some(contact_id)).await
    }
}

#[derive(Default)]
pub struct InMemoryContactRepository {
    contacts: RwLock<HashMap<String, ContactRecord>>,
}

#[async_trait::async_trait]
impl ContactRepository for InMemoryContactRepository {
    async fn find_contact(&self, id: &ContactId) -> Result<Option<ContactRecord>, RepositoryError> {
        let contacts = self.contacts.read().await;
        Ok(contacts.get(&id.0).cloned())
    }

    async fn save_contact(&self, contact: ContactRecord) -> Result<(), RepositoryError> {
        let mut contacts = self.contacts.write().await;
        contacts.insert(contact.id.0.clone(), contact);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryKnowledgeRepository {
    passages: RwLock<Vec<KnowledgePassage>>,
}

#[async_trait::async_trait]
impl KnowledgeRepository for InMemoryKnowledgeRepository {
    async fn passages_for_agent(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<KnowledgePassage>, RepositoryError> {
        let passages = self.passages.read().await;
        Ok(passages.iter().filter(|passage| &passage.agent_id == agent_id).cloned().collect())
    }

    async fn save_passage(&self, passage: KnowledgePassage) -> Result<(), RepositoryError> {
        let mut passages = self.passages.write().await;
        match passages.iter_mut().find(|existing| existing.id == passage.id) {
            Some(existing) => *existing = passage,
            None => passages.push(passage),
        }
        Ok(())
    }

    async fn store_embedding(
        &self,
        id: &PassageId,
        embedding: Vec<f32>,
    ) -> Result<(), RepositoryError> {
        let mut passages = self.passages.write().await;
        let passage = passages.iter_mut().find(|passage| &passage.id == id).ok_or_else(|| {
            RepositoryError::NotFound { entity: "knowledge passage", id: id.0.clone() }
        })?;
        passage.embedding = Some(embedding);
        Ok(())
    }
}

/// Usage ledger with its own balance book, for tests that do not wire an agent repository.
#[derive(Default)]
pub struct InMemoryUsageRepository {
    records: RwLock<Vec<UsageRecord>>,
    balances: RwLock<HashMap<String, i64>>,
}

impl InMemoryUsageRepository {
    pub async fn set_balance(&self, workspace_id: &WorkspaceId, balance: i64) {
        self.balances.write().await.insert(workspace_id.0.clone(), balance);
    }

    pub async fn balance(&self, workspace_id: &WorkspaceId) -> Option<i64> {
        self.balances.read().await.get(&workspace_id.0).copied()
    }

    pub async fn records(&self) -> Vec<UsageRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait::async_trait]
impl UsageRepository for InMemoryUsageRepository {
    async fn record_usage(&self, record: UsageRecord) -> Result<i64, RepositoryError> {
        let mut balances = self.balances.write().await;
        let balance = balances.get_mut(&record.workspace_id.0).ok_or_else(|| {
            RepositoryError::NotFound { entity: "workspace", id: record.workspace_id.0.clone() }
        })?;
        *balance = balance.saturating_sub(i64::try_from(record.credits_used).unwrap_or(i64::MAX));
        let remaining = *balance;
        drop(balances);

        self.records.write().await.push(record);
        Ok(remaining)
    }

    async fn usage_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<UsageRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut matching: Vec<UsageRecord> = records
            .iter()
            .filter(|record| &record.conversation_id == conversation_id)
            .cloned()
            .collect();
        matching.sort_by_key(|record| record.created_at);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use parley_core::domain::agent::WorkspaceId;
    use parley_core::domain::conversation::{ConversationStatus, Message, MessageRole};
    use parley_core::domain::usage::UsageRecord;

    use crate::fixtures::{sample_agent, sample_conversation, sample_passages, sample_workspace};
    use parley_core::domain::contact::ContactRecord;

    use crate::repositories::{
        AgentRepository, ContactRepository, ConversationRepository, InMemoryAgentRepository,
        InMemoryContactRepository, InMemoryConversationRepository, InMemoryKnowledgeRepository,
        InMemoryUsageRepository, KnowledgeRepository, RepositoryError, UsageRepository,
    };

    #[tokio::test]
    async fn in_memory_agent_repo_round_trip() {
        let repo = InMemoryAgentRepository::default();
        repo.save_workspace(sample_workspace()).await.expect("workspace");
        repo.save_agent(sample_agent()).await.expect("agent");

        assert_eq!(repo.find_agent(&sample_agent().id).await.expect("find"), Some(sample_agent()));
        assert_eq!(
            repo.find_workspace(&sample_workspace().id).await.expect("find"),
            Some(sample_workspace())
        );
    }

    #[tokio::test]
    async fn in_memory_conversation_repo_appends_and_transitions() {
        let repo = InMemoryConversationRepository::default();
        let conversation = sample_conversation();
        repo.save_conversation(conversation.clone()).await.expect("save");

        repo.append_message(Message::new(conversation.id.clone(), MessageRole::User, "hi", None))
            .await
            .expect("append");
        repo.update_status(&conversation.id, ConversationStatus::Closed).await.expect("status");

        let found = repo.find_conversation(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(found.messages.len(), 1);
        assert_eq!(found.status, ConversationStatus::Closed);
        assert!(found.last_message_at.is_some());
    }

    #[tokio::test]
    async fn in_memory_contact_and_knowledge_repos() {
        let contacts = InMemoryContactRepository::default();
        let mut contact = ContactRecord::anonymous(sample_workspace().id);
        contact.data.insert("insurance".to_owned(), json!("AXA"));
        contacts.save_contact(contact.clone()).await.expect("save");
        assert_eq!(contacts.find_contact(&contact.id).await.expect("find"), Some(contact));

        let knowledge = InMemoryKnowledgeRepository::default();
        for passage in sample_passages() {
            knowledge.save_passage(passage).await.expect("save");
        }
        let first = sample_passages()[0].id.clone();
        knowledge.store_embedding(&first, vec![1.0, 0.0]).await.expect("embed");
        let passages = knowledge.passages_for_agent(&sample_agent().id).await.expect("load");
        assert_eq!(passages.len(), 3);
        assert_eq!(passages[0].embedding, Some(vec![1.0, 0.0]));
    }

    #[tokio::test]
    async fn in_memory_usage_repo_tracks_balance() {
        let repo = InMemoryUsageRepository::default();
        let workspace = sample_workspace();
        repo.set_balance(&workspace.id, 5).await;

        let record = UsageRecord::new(
            workspace.id.clone(),
            sample_agent().id,
            sample_conversation().id,
            701,
            "gpt-4o-mini",
        );
        let balance = repo.record_usage(record).await.expect("record");
        assert_eq!(balance, 5 - 8);

        let missing = UsageRecord::new(
            WorkspaceId("ghost".to_owned()),
            sample_agent().id,
            sample_conversation().id,
            1,
            "gpt-4o-mini",
        );
        let error = repo.record_usage(missing).await.expect_err("missing workspace");
        assert!(matches!(error, RepositoryError::NotFound { .. }));
        assert_eq!(repo.records().await.len(), 1);
    }
}
