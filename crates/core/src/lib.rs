pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod escalation;
pub mod prompt;
pub mod reconciliation;
pub mod similarity;

pub use domain::agent::{AgentConfig, AgentId, Integration, Workspace, WorkspaceId};
pub use domain::contact::{ContactId, ContactRecord};
pub use domain::conversation::{
    ConversationId, ConversationState, ConversationStatus, Message, MessageRole,
};
pub use domain::tool::{ToolCall, ToolResult};
pub use domain::usage::{credits_for_tokens, UsageRecord};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use escalation::{EscalationEngine, EscalationEvent, EscalationTransitionError};
