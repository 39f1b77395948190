//! Agent runtime: the reply cycle behind every channel.
//!
//! The crate turns one inbound visitor message into one reply:
//! - Retrieves knowledge (`retrieval`) with HyDE expansion, cosine ranking and optional re-rank
//! - Composes the system prompt from the agent's configuration (`parley_core::prompt`)
//! - Talks to the model through a pinned fallback chain (`session`, `fallback`, `providers`)
//! - Runs the bounded tool loop (`tools`) under server-side guardrails (`guardrails`)
//! - Stores the reply and bills credits (`runtime`)
//!
//! The model never owns state transitions. Contact writes, handoffs and bookings all go through
//! tool handlers that validate their input and report failures back to the model as data.

pub mod connectors;
pub mod conversation;
pub mod fallback;
pub mod guardrails;
pub mod llm;
pub mod notifier;
pub mod providers;
pub mod retrieval;
pub mod runtime;
pub mod session;
pub mod tools;

pub use connectors::{ConnectorFactory, HttpConnectorFactory};
pub use llm::{ChatProvider, ModelTurn, ProviderError};
pub use notifier::{HandoffEmail, HandoffNotifier, NotifyError};
pub use providers::ProviderRegistry;
pub use retrieval::{RetrievalPipeline, RetrievalSettings};
pub use runtime::{AgentRuntime, ReplyOutcome, RuntimeError, RuntimeSettings};
pub use tools::{ToolDispatcher, ToolServices};
