use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use parley_agent::connectors::HttpConnectorFactory;
use parley_agent::llm::{ChatRequest, ChatResponse, TranscriptEntry};
use parley_agent::notifier::{HandoffEmail, HandoffNotifier, NotifyError};
use parley_agent::retrieval::{RetrievalPipeline, RetrievalSettings};
use parley_agent::runtime::{AgentRuntime, RuntimeSettings};
use parley_agent::tools::ToolServices;
use parley_agent::{ChatProvider, ModelTurn, ProviderError, ProviderRegistry};
use parley_core::audit::NoopAuditSink;
use parley_core::config::ProviderFamily;
use parley_core::domain::agent::AgentConfig;
use parley_core::domain::conversation::{ConversationState, Message, MessageRole};
use parley_core::domain::tool::ToolCall;
use parley_db::fixtures::sample_workspace;
use parley_db::repositories::{
    AgentRepository, ConversationRepository, InMemoryAgentRepository, InMemoryContactRepository,
    InMemoryConversationRepository, InMemoryKnowledgeRepository, InMemoryUsageRepository,
};

#[derive(Clone, Debug)]
pub struct SeenRequest {
    pub model: String,
    pub system: String,
    pub tools: Vec<String>,
    pub transcript: Vec<TranscriptEntry>,
}

/// Answers from a queue; an empty queue answers with HTTP 503.
pub struct ScriptedProvider {
    family: ProviderFamily,
    script: Mutex<VecDeque<Result<ChatResponse, ProviderError>>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedProvider {
    pub fn new(family: ProviderFamily) -> Arc<Self> {
        Arc::new(Self { family, script: Mutex::new(VecDeque::new()), seen: Mutex::new(Vec::new()) })
    }

    pub fn push_text(&self, text: &str, tokens_used: u64) {
        self.push(Ok(ChatResponse { turn: ModelTurn::FinalText(text.to_string()), tokens_used }));
    }

    pub fn push_tools(&self, content: Option<&str>, calls: Vec<ToolCall>, tokens_used: u64) {
        self.push(Ok(ChatResponse {
            turn: ModelTurn::ToolCallBatch { content: content.map(str::to_string), calls },
            tokens_used,
        }));
    }

    pub fn push(&self, response: Result<ChatResponse, ProviderError>) {
        self.script.lock().expect("script lock").push_back(response);
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().expect("seen lock").clone()
    }

    pub fn models(&self) -> Vec<String> {
        self.requests().into_iter().map(|request| request.model).collect()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn family(&self) -> ProviderFamily {
        self.family
    }

    async fn chat(&self, request: ChatRequest<'_>) -> Result<ChatResponse, ProviderError> {
        self.seen.lock().expect("seen lock").push(SeenRequest {
            model: request.model.to_string(),
            system: request.system.to_string(),
            tools: request.tools.iter().map(|tool| tool.name.clone()).collect(),
            transcript: request.transcript.to_vec(),
        });
        self.script.lock().expect("script lock").pop_front().unwrap_or_else(|| {
            Err(ProviderError::Http { status: 503, message: "model overloaded".to_string() })
        })
    }
}

struct SilentNotifier;

#[async_trait]
impl HandoffNotifier for SilentNotifier {
    async fn send_handoff_email(&self, _email: HandoffEmail) -> Result<(), NotifyError> {
        Ok(())
    }
}

pub struct Harness {
    pub runtime: AgentRuntime,
    pub agents: Arc<InMemoryAgentRepository>,
    pub conversations: Arc<InMemoryConversationRepository>,
    pub contacts: Arc<InMemoryContactRepository>,
    pub usage: Arc<InMemoryUsageRepository>,
}

impl Harness {
    pub async fn start(
        agent: AgentConfig,
        conversation: ConversationState,
        registry: ProviderRegistry,
    ) -> Self {
        let workspace = sample_workspace();
        let agents = Arc::new(InMemoryAgentRepository::default());
        agents.save_workspace(workspace.clone()).await.expect("workspace");
        agents.save_agent(agent).await.expect("agent");

        let conversations = Arc::new(InMemoryConversationRepository::default());
        conversations.save_conversation(conversation).await.expect("conversation");
        let contacts = Arc::new(InMemoryContactRepository::default());
        let knowledge = Arc::new(InMemoryKnowledgeRepository::default());
        let usage = Arc::new(InMemoryUsageRepository::default());
        usage.set_balance(&workspace.id, workspace.credit_balance).await;

        let tools = ToolServices {
            agents: agents.clone(),
            contacts: contacts.clone(),
            conversations: conversations.clone(),
            notifier: Arc::new(SilentNotifier),
            connectors: Arc::new(
                HttpConnectorFactory::new(Duration::from_secs(5)).expect("http client"),
            ),
            audit: Arc::new(NoopAuditSink),
            enforce_contact_requirements: true,
            conversation_base_url: "https://app.parley.test/conversations".to_string(),
        };
        let retrieval =
            RetrievalPipeline::new(knowledge, registry.clone(), RetrievalSettings::default());
        let settings = RuntimeSettings {
            attempt_timeout: Duration::from_secs(5),
            ..RuntimeSettings::default()
        };

        let runtime = AgentRuntime::new(
            agents.clone(),
            conversations.clone(),
            usage.clone(),
            registry,
            retrieval,
            tools,
            settings,
        );
        Self { runtime, agents, conversations, contacts, usage }
    }

    /// Stores the inbound message ahead of a direct `generate_reply` call.
    pub async fn receive(&self, conversation: &ConversationState, text: &str) {
        self.conversations
            .append_message(Message::new(conversation.id.clone(), MessageRole::User, text, None))
            .await
            .expect("inbound message");
    }

    pub async fn messages(&self, conversation: &ConversationState) -> Vec<Message> {
        self.conversations
            .find_conversation(&conversation.id)
            .await
            .expect("find")
            .expect("conversation exists")
            .messages
    }
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall { id: id.to_string(), name: name.to_string(), arguments }
}
