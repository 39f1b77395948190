use std::time::Duration;

use tracing::{info, warn};

use parley_core::domain::tool::ToolResult;

use crate::fallback::{ChainState, FallbackChain, ModelDescriptor};
use crate::llm::{ChatRequest, ChatResponse, ModelTurn, ProviderError, ToolDescriptor, TranscriptEntry};
use crate::providers::ProviderRegistry;

/// One reply cycle's conversation with the model layer.
///
/// Owns the normalized transcript and the fallback state. The first call binds a descriptor;
/// later calls reuse it without retries.
pub struct ProviderSession {
    registry: ProviderRegistry,
    chain: FallbackChain,
    state: ChainState,
    system: String,
    transcript: Vec<TranscriptEntry>,
    tools: Vec<ToolDescriptor>,
    temperature: f32,
    attempt_timeout: Duration,
    tokens_used: u64,
}

impl ProviderSession {
    pub fn new(
        registry: ProviderRegistry,
        chain: FallbackChain,
        system: String,
        history: Vec<TranscriptEntry>,
        tools: Vec<ToolDescriptor>,
        temperature: f32,
        attempt_timeout: Duration,
    ) -> Self {
        let state = ChainState::start().settle(&chain);
        Self {
            registry,
            chain,
            state,
            system,
            transcript: history,
            tools,
            temperature,
            attempt_timeout,
            tokens_used: 0,
        }
    }

    pub async fn converse(&mut self, user_message: &str) -> Result<ModelTurn, ProviderError> {
        self.transcript.push(TranscriptEntry::User(user_message.to_string()));
        self.call().await
    }

    pub async fn resume(&mut self, results: &[ToolResult]) -> Result<ModelTurn, ProviderError> {
        self.transcript.extend(results.iter().map(TranscriptEntry::tool_result));
        self.call().await
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    pub fn bound(&self) -> Option<&ModelDescriptor> {
        match &self.state {
            ChainState::Bound(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    async fn call(&mut self) -> Result<ModelTurn, ProviderError> {
        if let ChainState::Bound(descriptor) = &self.state {
            let descriptor = descriptor.clone();
            let response = self.attempt(&descriptor).await.map_err(|error| {
                warn!(
                    event_name = "agent.provider.bound_failed",
                    model = %descriptor.label(),
                    error = %error,
                    "bound model failed mid-cycle"
                );
                error
            })?;
            return Ok(self.accept(response));
        }

        loop {
            let Some(descriptor) = self.chain.descriptor_for(&self.state).cloned() else {
                self.state = ChainState::Failed;
                warn!(event_name = "agent.provider.exhausted", "fallback chain exhausted");
                return Err(ProviderError::Exhausted);
            };

            match self.attempt(&descriptor).await {
                Ok(response) => {
                    let from_fallback = matches!(self.state, ChainState::FallbackFamily);
                    self.state = std::mem::replace(&mut self.state, ChainState::Failed)
                        .on_success(&self.chain);
                    info!(
                        event_name = "agent.provider.bound",
                        model = %descriptor.label(),
                        from_fallback,
                        "model bound for reply cycle"
                    );
                    return Ok(self.accept(response));
                }
                Err(error) => {
                    warn!(
                        event_name = "agent.provider.variant_failed",
                        model = %descriptor.label(),
                        error = %error,
                        "model attempt failed"
                    );
                    self.state = std::mem::replace(&mut self.state, ChainState::Failed)
                        .on_failure(&self.chain);
                }
            }
        }
    }

    async fn attempt(&self, descriptor: &ModelDescriptor) -> Result<ChatResponse, ProviderError> {
        let provider = self.registry.chat(descriptor.family).ok_or_else(|| {
            ProviderError::MissingCredentials {
                family: descriptor.family.as_str(),
                setting: parley_core::config::LlmConfig::api_key_setting(descriptor.family),
            }
        })?;

        let request = ChatRequest {
            model: &descriptor.model,
            system: &self.system,
            transcript: &self.transcript,
            tools: &self.tools,
            temperature: self.temperature,
        };

        tokio::time::timeout(self.attempt_timeout, provider.chat(request)).await.map_err(|_| {
            ProviderError::Timeout {
                model: descriptor.model.clone(),
                seconds: self.attempt_timeout.as_secs(),
            }
        })?
    }

    fn accept(&mut self, response: ChatResponse) -> ModelTurn {
        self.tokens_used = self.tokens_used.saturating_add(response.tokens_used);
        let entry = match &response.turn {
            ModelTurn::FinalText(text) => TranscriptEntry::assistant_text(text.clone()),
            ModelTurn::ToolCallBatch { content, calls } => {
                TranscriptEntry::Assistant { content: content.clone(), tool_calls: calls.clone() }
            }
        };
        self.transcript.push(entry);
        response.turn
    }
}
