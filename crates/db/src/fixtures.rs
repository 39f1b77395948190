use chrono::Utc;

use parley_core::config::DatabaseConfig;

use parley_core::domain::agent::{
    AgentConfig, AgentId, BehaviorFlags, CommunicationStyle, CustomFieldDefinition, FieldType,
    HandoffTarget, Workspace, WorkspaceId,
};
use parley_core::domain::conversation::{ConversationId, ConversationState, ConversationStatus};
use parley_core::domain::knowledge::{KnowledgePassage, PassageId};

use crate::connection::DbPool;
use crate::repositories::{
    AgentRepository, ConversationRepository, KnowledgeRepository, RepositoryError,
    SqlAgentRepository, SqlConversationRepository, SqlKnowledgeRepository,
};

/// Single-connection in-memory database, for tests.
pub fn in_memory_database() -> DatabaseConfig {
    DatabaseConfig { url: "sqlite::memory:".to_string(), max_connections: 1, timeout_secs: 30 }
}

pub const DEMO_WORKSPACE_ID: &str = "ws-demo";
pub const DEMO_AGENT_ID: &str = "agent-demo";
pub const DEMO_CONVERSATION_ID: &str = "conv-demo";

const DEMO_PASSAGES: &[(&str, &str)] = &[
    ("kp-demo-hours", "The clinic is open Monday to Friday from 9:00 to 18:00 and Saturdays from 9:00 to 13:00."),
    ("kp-demo-cleaning", "A standard dental cleaning costs 80 USD and takes about 45 minutes."),
    ("kp-demo-insurance", "We accept MetLife and AXA insurance. Other providers are reimbursed by the patient."),
];

pub fn sample_workspace() -> Workspace {
    Workspace {
        id: WorkspaceId(DEMO_WORKSPACE_ID.to_string()),
        name: "Acme Dental".to_string(),
        owner_email: "owner@acme-dental.test".to_string(),
        credit_balance: 1_000,
    }
}

pub fn sample_agent() -> AgentConfig {
    AgentConfig {
        id: AgentId(DEMO_AGENT_ID.to_string()),
        workspace_id: WorkspaceId(DEMO_WORKSPACE_ID.to_string()),
        name: "Lia".to_string(),
        company_name: "Acme Dental".to_string(),
        persona_prompt: "You help patients of Acme Dental book visits and answer questions."
            .to_string(),
        style: CommunicationStyle::Normal,
        model: "gemini-1.5-flash".to_string(),
        temperature: 0.5,
        timezone: "America/Mexico_City".to_string(),
        flags: BehaviorFlags {
            allow_emojis: false,
            sign_messages: false,
            restrict_topics: true,
            split_long_messages: false,
            transfer_to_human: true,
            smart_retrieval: true,
        },
        custom_fields: vec![
            CustomFieldDefinition {
                key: "insurance".to_string(),
                label: "Insurance provider".to_string(),
                description: Some("Who covers the treatment".to_string()),
                field_type: FieldType::Select,
                options: vec!["None".to_string(), "MetLife".to_string(), "AXA".to_string()],
            },
            CustomFieldDefinition {
                key: "visitReason".to_string(),
                label: "Reason for visit".to_string(),
                description: None,
                field_type: FieldType::Text,
                options: Vec::new(),
            },
        ],
        handoff_targets: vec![HandoffTarget {
            id: "front-desk".to_string(),
            name: "Front desk".to_string(),
            email: "desk@acme-dental.test".to_string(),
            description: Some("appointments and billing".to_string()),
        }],
        legacy_handoff_email: None,
        integrations: Vec::new(),
    }
}

pub fn sample_conversation() -> ConversationState {
    ConversationState {
        id: ConversationId(DEMO_CONVERSATION_ID.to_string()),
        agent_id: AgentId(DEMO_AGENT_ID.to_string()),
        contact_id: None,
        messages: Vec::new(),
        status: ConversationStatus::Active,
        last_message_at: None,
    }
}

pub fn sample_passages() -> Vec<KnowledgePassage> {
    DEMO_PASSAGES
        .iter()
        .map(|(id, content)| KnowledgePassage {
            id: PassageId((*id).to_string()),
            agent_id: AgentId(DEMO_AGENT_ID.to_string()),
            content: (*content).to_string(),
            embedding: None,
        })
        .collect()
}

/// Deterministic demo tenant: one workspace, one agent with knowledge, one open conversation.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let agents = SqlAgentRepository::new(pool.clone());
        let conversations = SqlConversationRepository::new(pool.clone());
        let knowledge = SqlKnowledgeRepository::new(pool.clone());

        agents.save_workspace(sample_workspace()).await?;
        agents.save_agent(sample_agent()).await?;
        conversations.save_conversation(sample_conversation()).await?;
        let passages = sample_passages();
        let passages_seeded = passages.len();
        for passage in passages {
            knowledge.save_passage(passage).await?;
        }

        Ok(SeedResult {
            workspace_id: DEMO_WORKSPACE_ID,
            agent_id: DEMO_AGENT_ID,
            conversation_id: DEMO_CONVERSATION_ID,
            passages_seeded,
            seeded_at: Utc::now().to_rfc3339(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let workspace: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM workspace WHERE id = ?1)")
            .bind(DEMO_WORKSPACE_ID)
            .fetch_one(pool)
            .await?;
        checks.push(("workspace", workspace == 1));

        let agent: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM agent WHERE id = ?1)")
            .bind(DEMO_AGENT_ID)
            .fetch_one(pool)
            .await?;
        checks.push(("agent", agent == 1));

        let fields: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM agent_custom_field WHERE agent_id = ?1")
                .bind(DEMO_AGENT_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("custom-fields", fields == 2));

        let conversation: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM conversation WHERE id = ?1)")
                .bind(DEMO_CONVERSATION_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("conversation", conversation == 1));

        let passages: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM knowledge_passage WHERE agent_id = ?1")
                .bind(DEMO_AGENT_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("knowledge-passages", passages == DEMO_PASSAGES.len() as i64));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the demo tenant; child rows cascade from the workspace.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM workspace WHERE id = ?1")
            .bind(DEMO_WORKSPACE_ID)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SeedResult {
    pub workspace_id: &'static str,
    pub agent_id: &'static str,
    pub conversation_id: &'static str,
    pub passages_seeded: usize,
    pub seeded_at: String,
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
pub(crate) async fn setup_pool() -> DbPool {
    let pool = crate::connect(&in_memory_database()).await.expect("connect");
    crate::migrations::run_pending(&pool).await.expect("migrations");
    pool
}
