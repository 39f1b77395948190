//! Reply cycle orchestration.
//!
//! Channel adapters call `receive_and_reply`, which stores the visitor's message and answers it
//! under one per-conversation lock; `generate_reply` answers a message that is already stored.
//! One cycle loads the agent and conversation, optionally retrieves knowledge, composes the system prompt, runs the
//! bounded model/tool loop, stores the reply and records usage. Degraded outcomes (provider
//! exhaustion, iteration cap, missing credentials) come back as reply text, never as errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use parley_core::audit::AuditContext;
use parley_core::config::{AppConfig, LlmConfig, ProviderFamily};
use parley_core::domain::agent::{AgentConfig, AgentId, Workspace};
use parley_core::domain::conversation::{
    ConversationId, ConversationState, ConversationStatus, Message, MessageMetadata, MessageRole,
};
use parley_core::domain::usage::UsageRecord;
use parley_core::errors::{ApplicationError, DomainError};
use parley_core::escalation::{
    EscalationContext, EscalationEngine, EscalationEvent, EscalationTransitionError,
};
use parley_core::prompt::{compose_system_prompt, PromptInput};
use parley_db::repositories::{
    AgentRepository, ConversationRepository, RepositoryError, UsageRepository,
};

use crate::conversation::{history_transcript, split_reply};
use crate::fallback::FallbackChain;
use crate::llm::ModelTurn;
use crate::providers::ProviderRegistry;
use crate::retrieval::RetrievalPipeline;
use crate::session::ProviderSession;
use crate::tools::{ToolContext, ToolServices};

/// Provider round trips allowed per reply cycle, the first call included.
pub const MAX_ROUND_TRIPS: usize = 3;

pub const APOLOGY_REPLY: &str =
    "Sorry, I'm having trouble answering right now. Please try again in a moment.";
pub const GENERIC_FALLBACK_REPLY: &str =
    "I wasn't able to finish that just now. Could you tell me a bit more about what you need?";

const LOCK_TABLE_PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("agent `{0}` was not found")]
    AgentNotFound(String),
    #[error("workspace `{0}` was not found")]
    WorkspaceNotFound(String),
    #[error("conversation `{0}` was not found")]
    ConversationNotFound(String),
    #[error(transparent)]
    Transition(#[from] EscalationTransitionError),
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
}

impl From<RuntimeError> for ApplicationError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::AgentNotFound(_)
            | RuntimeError::WorkspaceNotFound(_)
            | RuntimeError::ConversationNotFound(_) => Self::NotFound(error.to_string()),
            RuntimeError::Transition(error) => Self::Domain(DomainError::Escalation(error)),
            RuntimeError::Persistence(RepositoryError::NotFound { entity, id }) => {
                Self::NotFound(format!("{entity} `{id}`"))
            }
            RuntimeError::Persistence(error) => Self::Persistence(error.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplyOutcome {
    pub reply: String,
    pub tokens_used: u64,
    pub credits_used: u64,
}

impl ReplyOutcome {
    fn without_usage(reply: impl Into<String>) -> Self {
        Self { reply: reply.into(), tokens_used: 0, credits_used: 0 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub fallback_family: ProviderFamily,
    pub fallback_model: String,
    pub attempt_timeout: Duration,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            fallback_family: config.llm.fallback_family,
            fallback_model: config.llm.fallback_model.clone(),
            attempt_timeout: Duration::from_secs(config.llm.timeout_secs.max(1)),
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            fallback_family: ProviderFamily::OpenAi,
            fallback_model: "gpt-4o-mini".to_string(),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

pub struct AgentRuntime {
    agents: Arc<dyn AgentRepository>,
    conversations: Arc<dyn ConversationRepository>,
    usage: Arc<dyn UsageRepository>,
    providers: ProviderRegistry,
    retrieval: RetrievalPipeline,
    tools: ToolServices,
    settings: RuntimeSettings,
    escalation: EscalationEngine,
    locks: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

struct CycleTarget {
    agent: AgentConfig,
    workspace: Workspace,
    conversation: ConversationState,
}

enum LoopEnd {
    Reply(String),
    CapReached(Option<String>),
    ProviderFailed,
}

impl AgentRuntime {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        conversations: Arc<dyn ConversationRepository>,
        usage: Arc<dyn UsageRepository>,
        providers: ProviderRegistry,
        retrieval: RetrievalPipeline,
        tools: ToolServices,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            agents,
            conversations,
            usage,
            providers,
            retrieval,
            tools,
            settings,
            escalation: EscalationEngine::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Stores the visitor's message and answers it while holding the conversation lock, so
    /// concurrent messages are recorded and answered one at a time. Nothing is stored when the
    /// agent or conversation is unknown or the conversation belongs to another agent.
    pub async fn receive_and_reply(
        &self,
        agent_id: &AgentId,
        conversation_id: &ConversationId,
        user_message: &str,
    ) -> Result<ReplyOutcome, RuntimeError> {
        let lock = self.conversation_lock(conversation_id).await;
        let _serialized = lock.lock().await;

        let mut target = self.load_target(agent_id, conversation_id).await?;
        let message =
            Message::new(conversation_id.clone(), MessageRole::User, user_message, None);
        self.conversations.append_message(message.clone()).await?;
        target.conversation.messages.push(message);
        debug!(
            event_name = "agent.message.received",
            conversation_id = %conversation_id.0,
            agent_id = %agent_id.0,
            "visitor message stored"
        );

        self.reply_cycle(target, user_message).await
    }

    /// Answers `user_message`, which the caller has already stored in the conversation.
    pub async fn generate_reply(
        &self,
        agent_id: &AgentId,
        conversation_id: &ConversationId,
        user_message: &str,
    ) -> Result<ReplyOutcome, RuntimeError> {
        let lock = self.conversation_lock(conversation_id).await;
        let _serialized = lock.lock().await;

        let target = self.load_target(agent_id, conversation_id).await?;
        self.reply_cycle(target, user_message).await
    }

    async fn load_target(
        &self,
        agent_id: &AgentId,
        conversation_id: &ConversationId,
    ) -> Result<CycleTarget, RuntimeError> {
        let agent = self
            .agents
            .find_agent(agent_id)
            .await?
            .ok_or_else(|| RuntimeError::AgentNotFound(agent_id.0.clone()))?;
        let workspace = self
            .agents
            .find_workspace(&agent.workspace_id)
            .await?
            .ok_or_else(|| RuntimeError::WorkspaceNotFound(agent.workspace_id.0.clone()))?;
        let conversation = self
            .conversations
            .find_conversation(conversation_id)
            .await?
            .filter(|conversation| conversation.agent_id == agent.id)
            .ok_or_else(|| RuntimeError::ConversationNotFound(conversation_id.0.clone()))?;
        Ok(CycleTarget { agent, workspace, conversation })
    }

    /// Runs with the conversation lock held by the caller.
    async fn reply_cycle(
        &self,
        target: CycleTarget,
        user_message: &str,
    ) -> Result<ReplyOutcome, RuntimeError> {
        let started = Instant::now();
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let CycleTarget { agent, workspace, conversation } = target;
        let conversation_id = &conversation.id;

        match conversation.status {
            ConversationStatus::Pending => {
                info!(
                    event_name = "agent.reply.skipped_pending",
                    conversation_id = %conversation_id.0,
                    correlation_id = %correlation_id,
                    "conversation is owned by a human"
                );
                return Ok(ReplyOutcome::without_usage(""));
            }
            ConversationStatus::Closed => self.reopen(&agent, &conversation, &correlation_id).await?,
            ConversationStatus::Active => {}
        }

        let primary = ProviderFamily::for_model(&agent.model);
        if !self.providers.has_family(primary) {
            let setting = LlmConfig::api_key_setting(primary);
            warn!(
                event_name = "agent.reply.configuration_error",
                conversation_id = %conversation_id.0,
                agent_id = %agent.id.0,
                model = %agent.model,
                setting,
                "no credentials for the agent's model family"
            );
            return Ok(ReplyOutcome::without_usage(format!(
                "This assistant is not configured yet: the `{setting}` setting is missing. Please contact the site owner."
            )));
        }

        let passages = if agent.flags.smart_retrieval {
            self.retrieval.retrieve(&agent.id, user_message).await
        } else {
            Vec::new()
        };
        let system = compose_system_prompt(&PromptInput {
            agent: &agent,
            passages: &passages,
            now: Utc::now(),
        });

        let dispatcher = self.tools.dispatcher_for(&agent);
        let chain = FallbackChain::new(
            &agent.model,
            self.settings.fallback_family,
            &self.settings.fallback_model,
        );
        let mut session = ProviderSession::new(
            self.providers.clone(),
            chain,
            system,
            history_transcript(&conversation.messages, user_message),
            dispatcher.catalog().to_vec(),
            agent.temperature,
            self.settings.attempt_timeout,
        );
        let tool_context = ToolContext::new(
            Arc::new(agent.clone()),
            workspace.clone(),
            conversation.id.clone(),
            conversation.contact_id.clone(),
            ConversationStatus::Active,
            correlation_id.clone(),
        );

        let mut round_trips = 1;
        let mut last_content: Option<String> = None;
        let mut turn = session.converse(user_message).await;
        let end = loop {
            match turn {
                Err(error) => {
                    warn!(
                        event_name = "agent.reply.provider_failed",
                        conversation_id = %conversation_id.0,
                        correlation_id = %correlation_id,
                        error = %error,
                        "answering with apology"
                    );
                    break LoopEnd::ProviderFailed;
                }
                Ok(ModelTurn::FinalText(text)) => break LoopEnd::Reply(text),
                Ok(ModelTurn::ToolCallBatch { content, calls }) => {
                    if let Some(content) = content.filter(|content| !content.trim().is_empty()) {
                        last_content = Some(content);
                    }
                    if round_trips >= MAX_ROUND_TRIPS {
                        break LoopEnd::CapReached(last_content);
                    }
                    let results = dispatcher.dispatch(&calls, &tool_context).await;
                    turn = session.resume(&results).await;
                    round_trips += 1;
                }
            }
        };

        let reply = match end {
            LoopEnd::Reply(text) if !text.trim().is_empty() => text.trim().to_string(),
            LoopEnd::Reply(_) => GENERIC_FALLBACK_REPLY.to_string(),
            LoopEnd::CapReached(content) => {
                warn!(
                    event_name = "agent.reply.iteration_cap",
                    conversation_id = %conversation_id.0,
                    correlation_id = %correlation_id,
                    round_trips,
                    "model still requested tools at the cap"
                );
                content.unwrap_or_else(|| GENERIC_FALLBACK_REPLY.to_string())
            }
            LoopEnd::ProviderFailed => APOLOGY_REPLY.to_string(),
        };

        let tokens_used = session.tokens_used();
        let model = session
            .bound()
            .map(|descriptor| descriptor.model.clone())
            .unwrap_or_else(|| agent.model.clone());

        self.store_reply(&agent, conversation_id, &reply, tokens_used, &model).await;

        let record = UsageRecord::new(
            workspace.id.clone(),
            agent.id.clone(),
            conversation_id.clone(),
            tokens_used,
            model.clone(),
        );
        let credits_used = record.credits_used;
        match self.usage.record_usage(record).await {
            Ok(balance) => debug!(
                event_name = "agent.usage.recorded",
                workspace_id = %workspace.id.0,
                credits_used,
                balance,
                "credits decremented"
            ),
            Err(error) => warn!(
                event_name = "agent.usage.record_failed",
                workspace_id = %workspace.id.0,
                conversation_id = %conversation_id.0,
                credits_used,
                error = %error,
                "usage was not recorded"
            ),
        }

        info!(
            event_name = "agent.reply.completed",
            conversation_id = %conversation_id.0,
            agent_id = %agent.id.0,
            correlation_id = %correlation_id,
            model = %model,
            round_trips,
            tokens_used,
            credits_used,
            passages = passages.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reply cycle completed"
        );

        Ok(ReplyOutcome { reply, tokens_used, credits_used })
    }

    async fn conversation_lock(&self, conversation_id: &ConversationId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        if locks.len() >= LOCK_TABLE_PRUNE_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks.entry(conversation_id.clone()).or_default().clone()
    }

    async fn reopen(
        &self,
        agent: &AgentConfig,
        conversation: &ConversationState,
        correlation_id: &str,
    ) -> Result<(), RuntimeError> {
        let audit = AuditContext::new(
            Some(conversation.id.clone()),
            Some(agent.id.clone()),
            correlation_id,
            "agent",
        );
        let outcome = self.escalation.apply_with_audit(
            conversation.status,
            EscalationEvent::Reopened,
            &EscalationContext::unchecked(),
            self.tools.audit.as_ref(),
            &audit,
        )?;
        self.conversations.update_status(&conversation.id, outcome.to).await?;
        info!(
            event_name = "agent.conversation.reopened",
            conversation_id = %conversation.id.0,
            correlation_id,
            "closed conversation reopened by visitor"
        );
        Ok(())
    }

    async fn store_reply(
        &self,
        agent: &AgentConfig,
        conversation_id: &ConversationId,
        reply: &str,
        tokens_used: u64,
        model: &str,
    ) {
        let chunks =
            if agent.flags.split_long_messages { split_reply(reply) } else { vec![reply.to_string()] };
        let last = chunks.len().saturating_sub(1);

        for (index, chunk) in chunks.into_iter().enumerate() {
            let metadata = (index == last)
                .then(|| MessageMetadata { tokens: tokens_used, model: model.to_string() });
            let message = Message::new(conversation_id.clone(), MessageRole::Agent, chunk, metadata);
            if let Err(error) = self.conversations.append_message(message).await {
                warn!(
                    event_name = "agent.reply.store_failed",
                    conversation_id = %conversation_id.0,
                    error = %error,
                    "reply was not persisted"
                );
                return;
            }
        }
    }
}
