//! Tool catalog and dispatch.
//!
//! Each enabled capability contributes a fixed set of tools. The catalog is computed once per
//! reply cycle; dispatch refuses anything outside it and never lets one failing call abort the
//! batch.

mod calendar;
mod commerce;
mod contact;
mod handoff;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use parley_core::audit::AuditSink;
use parley_core::domain::agent::{AgentConfig, Workspace};
use parley_core::domain::contact::ContactId;
use parley_core::domain::conversation::{ConversationId, ConversationStatus};
use parley_core::domain::tool::{ToolCall, ToolResult};
use parley_core::reconciliation::ReconciliationError;
use parley_db::repositories::{
    AgentRepository, ContactRepository, ConversationRepository, RepositoryError,
};

use crate::connectors::{ConnectorError, ConnectorFactory};
use crate::guardrails::{GuardrailDecision, GuardrailIntent, GuardrailPolicy};
use crate::llm::ToolDescriptor;
use crate::notifier::HandoffNotifier;

pub use calendar::{CalendarCapability, CREATE_EVENT_TOOL, LIST_AVAILABILITY_TOOL};
pub use commerce::{CommerceCapability, ORDER_STATUS_TOOL, SEARCH_PRODUCTS_TOOL};
pub use contact::ContactCapability;
pub use handoff::HandoffCapability;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Refused(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error("storage failure: {0}")]
    Persistence(#[from] RepositoryError),
}

/// Mutable per-cycle facts shared by the tools of one batch.
pub struct ToolContext {
    pub agent: Arc<AgentConfig>,
    pub workspace: Workspace,
    pub conversation_id: ConversationId,
    pub correlation_id: String,
    contact_id: Mutex<Option<ContactId>>,
    status: Mutex<ConversationStatus>,
}

impl ToolContext {
    pub fn new(
        agent: Arc<AgentConfig>,
        workspace: Workspace,
        conversation_id: ConversationId,
        contact_id: Option<ContactId>,
        status: ConversationStatus,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            workspace,
            conversation_id,
            correlation_id: correlation_id.into(),
            contact_id: Mutex::new(contact_id),
            status: Mutex::new(status),
        }
    }

    pub async fn status(&self) -> ConversationStatus {
        *self.status.lock().await
    }

    pub async fn contact_id(&self) -> Option<ContactId> {
        self.contact_id.lock().await.clone()
    }
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn tools(&self) -> Vec<ToolDescriptor>;

    async fn invoke(&self, call: &ToolCall, context: &ToolContext) -> Result<Value, ToolError>;
}

/// Long-lived collaborators tools need; per-agent capabilities are assembled from these.
#[derive(Clone)]
pub struct ToolServices {
    pub agents: Arc<dyn AgentRepository>,
    pub contacts: Arc<dyn ContactRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub notifier: Arc<dyn HandoffNotifier>,
    pub connectors: Arc<dyn ConnectorFactory>,
    pub audit: Arc<dyn AuditSink>,
    pub enforce_contact_requirements: bool,
    pub conversation_base_url: String,
}

impl ToolServices {
    pub fn capabilities_for(&self, agent: &AgentConfig) -> Vec<Arc<dyn Capability>> {
        let mut capabilities: Vec<Arc<dyn Capability>> = vec![Arc::new(ContactCapability::new(
            self.contacts.clone(),
            self.conversations.clone(),
            self.agents.clone(),
            agent.custom_fields.clone(),
        ))];

        if agent.flags.transfer_to_human {
            capabilities.push(Arc::new(HandoffCapability::new(self.clone(), agent)));
        }
        if let Some(calendar) = agent.calendar() {
            capabilities.push(Arc::new(CalendarCapability::new(
                self.connectors.calendar(calendar),
                calendar.default_event_minutes,
            )));
        }
        if let Some(shopify) = agent.shopify() {
            capabilities.push(Arc::new(CommerceCapability::new(self.connectors.commerce(shopify))));
        }
        capabilities
    }

    pub fn dispatcher_for(&self, agent: &AgentConfig) -> ToolDispatcher {
        ToolDispatcher::new(self.capabilities_for(agent), GuardrailPolicy::default())
    }
}

pub struct ToolDispatcher {
    capabilities: Vec<Arc<dyn Capability>>,
    catalog: Vec<ToolDescriptor>,
    routes: HashMap<String, usize>,
    policy: GuardrailPolicy,
}

impl ToolDispatcher {
    pub fn new(capabilities: Vec<Arc<dyn Capability>>, policy: GuardrailPolicy) -> Self {
        let mut catalog = Vec::new();
        let mut routes = HashMap::new();
        for (index, capability) in capabilities.iter().enumerate() {
            for tool in capability.tools() {
                if routes.contains_key(&tool.name) {
                    continue;
                }
                routes.insert(tool.name.clone(), index);
                catalog.push(tool);
            }
        }
        let policy = policy.with_offered_tools(catalog.iter().map(|tool| tool.name.clone()));
        Self { capabilities, catalog, routes, policy }
    }

    pub fn catalog(&self) -> &[ToolDescriptor] {
        &self.catalog
    }

    /// Runs a batch concurrently; results come back in the order the calls were given.
    pub async fn dispatch(&self, calls: &[ToolCall], context: &ToolContext) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.dispatch_one(call, context))).await
    }

    async fn dispatch_one(&self, call: &ToolCall, context: &ToolContext) -> ToolResult {
        if let GuardrailDecision::Deny { reason_code, user_message, .. } =
            self.policy.evaluate(&GuardrailIntent::InvokeTool { name: &call.name })
        {
            warn!(
                event_name = "agent.tool.refused",
                tool = %call.name,
                reason_code,
                conversation_id = %context.conversation_id.0,
                "tool call outside catalog"
            );
            return ToolResult::failure(call, user_message);
        }

        let Some(capability) = self.routes.get(&call.name).and_then(|index| self.capabilities.get(*index))
        else {
            return ToolResult::failure(call, format!("Tool `{}` is not available.", call.name));
        };

        match capability.invoke(call, context).await {
            Ok(payload) => {
                debug!(
                    event_name = "agent.tool.succeeded",
                    tool = %call.name,
                    conversation_id = %context.conversation_id.0,
                    "tool call completed"
                );
                ToolResult::success(call, payload)
            }
            Err(error) => {
                warn!(
                    event_name = "agent.tool.failed",
                    tool = %call.name,
                    conversation_id = %context.conversation_id.0,
                    error = %error,
                    "tool call failed"
                );
                ToolResult::failure(call, error.to_string())
            }
        }
    }
}

fn arguments_object(call: &ToolCall) -> Result<&Map<String, Value>, ToolError> {
    call.arguments
        .as_object()
        .ok_or_else(|| ToolError::InvalidArguments("arguments must be a JSON object".to_string()))
}

fn required_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    optional_str(arguments, key)
        .ok_or_else(|| ToolError::InvalidArguments(format!("`{key}` is required")))
}

fn optional_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str).map(str::trim).filter(|value| !value.is_empty())
}
