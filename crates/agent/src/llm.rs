//! Provider-agnostic chat contract.
//!
//! Every backend speaks in terms of a normalized transcript and returns either final text or a
//! batch of tool calls. Wire formats stay inside `providers`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use parley_core::config::ProviderFamily;
use parley_core::domain::tool::{ToolCall, ToolResult};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("no credentials configured for provider family `{family}` (set `{setting}`)")]
    MissingCredentials { family: &'static str, setting: &'static str },
    #[error("model `{model}` did not answer within {seconds}s")]
    Timeout { model: String, seconds: u64 },
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("every model in the fallback chain failed")]
    Exhausted,
}

/// Tool offered to the model: a name, a human description and a JSON-schema parameter object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self { name: name.to_string(), description: description.to_string(), parameters }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TranscriptEntry {
    User(String),
    Assistant { content: Option<String>, tool_calls: Vec<ToolCall> },
    Tool { call_id: String, name: String, result_json: String },
}

impl TranscriptEntry {
    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::Assistant { content: Some(content.into()), tool_calls: Vec::new() }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        Self::Tool {
            call_id: result.call_id.clone(),
            name: result.name.clone(),
            result_json: result.result_json(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModelTurn {
    FinalText(String),
    ToolCallBatch { content: Option<String>, calls: Vec<ToolCall> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatResponse {
    pub turn: ModelTurn,
    pub tokens_used: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub transcript: &'a [TranscriptEntry],
    pub tools: &'a [ToolDescriptor],
    pub temperature: f32,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn family(&self) -> ProviderFamily;

    async fn chat(&self, request: ChatRequest<'_>) -> Result<ChatResponse, ProviderError>;
}

/// One-shot text completion on top of [`ChatProvider`], used by HyDE and re-ranking.
pub async fn complete_text(
    provider: &dyn ChatProvider,
    model: &str,
    prompt: &str,
) -> Result<String, ProviderError> {
    let transcript = [TranscriptEntry::User(prompt.to_string())];
    let response = provider
        .chat(ChatRequest {
            model,
            system: "You are a precise assistant. Follow the output format exactly.",
            transcript: &transcript,
            tools: &[],
            temperature: 0.0,
        })
        .await?;

    match response.turn {
        ModelTurn::FinalText(text) if !text.trim().is_empty() => Ok(text),
        ModelTurn::FinalText(_) => Err(ProviderError::InvalidResponse("empty completion".into())),
        ModelTurn::ToolCallBatch { .. } => {
            Err(ProviderError::InvalidResponse("unexpected tool call in completion".into()))
        }
    }
}
