use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use parley_core::config::ProviderFamily;
use parley_core::domain::tool::ToolCall;

use super::types::{
    ApiErrorBody, ChatCompletionRequest, ChatCompletionResponse, EmbeddingRequest,
    EmbeddingResponse, WireFunctionCall, WireFunctionSpec, WireMessage, WireTool, WireToolCall,
};
use crate::llm::{ChatProvider, ChatRequest, ChatResponse, ModelTurn, ProviderError, TranscriptEntry};
use crate::retrieval::embedding::Embedder;

/// Chat and embedding client for any endpoint speaking the chat-completions dialect.
/// Gemini is reached through its OpenAI-compatible surface, so both families share this type.
pub struct OpenAiCompatibleProvider {
    client: Client,
    family: ProviderFamily,
    base_url: String,
    api_key: SecretString,
    embedding_model: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        family: ProviderFamily,
        base_url: impl Into<String>,
        api_key: SecretString,
        embedding_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ProviderError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            family,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            embedding_model: embedding_model.into(),
        })
    }

    async fn post<Req, Res>(&self, endpoint: &str, body: &Req) -> Result<Res, ProviderError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|error| ProviderError::Transport(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|error| ProviderError::InvalidResponse(error.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|body| body.error.message)
            .unwrap_or(text);
        Err(ProviderError::Http {
            status: status.as_u16(),
            message: if status == StatusCode::TOO_MANY_REQUESTS {
                format!("rate limited: {message}")
            } else {
                message
            },
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleProvider {
    fn family(&self) -> ProviderFamily {
        self.family
    }

    async fn chat(&self, request: ChatRequest<'_>) -> Result<ChatResponse, ProviderError> {
        let mut messages = Vec::with_capacity(request.transcript.len() + 1);
        messages.push(WireMessage::text("system", request.system));
        messages.extend(request.transcript.iter().map(to_wire));

        let body = ChatCompletionRequest {
            model: request.model,
            messages,
            tools: request
                .tools
                .iter()
                .map(|tool| WireTool {
                    kind: "function",
                    function: WireFunctionSpec {
                        name: &tool.name,
                        description: &tool.description,
                        parameters: &tool.parameters,
                    },
                })
                .collect(),
            temperature: request.temperature,
        };

        let response: ChatCompletionResponse = self.post("chat/completions", &body).await?;
        let tokens_used = response.usage.map(|usage| usage.total_tokens).unwrap_or(0);
        let message = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| ProviderError::InvalidResponse("response carried no choices".into()))?;

        Ok(ChatResponse { turn: to_turn(message), tokens_used })
    }
}

#[async_trait]
impl Embedder for OpenAiCompatibleProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = EmbeddingRequest { model: &self.embedding_model, input: vec![text] };
        let response: EmbeddingResponse = self.post("embeddings", &body).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .filter(|vector| !vector.is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("no embedding in response".into()))
    }
}

impl std::fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("family", &self.family)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

fn to_wire(entry: &TranscriptEntry) -> WireMessage {
    match entry {
        TranscriptEntry::User(content) => WireMessage::text("user", content.clone()),
        TranscriptEntry::Assistant { content, tool_calls } => WireMessage {
            role: "assistant".to_string(),
            content: content.clone(),
            tool_calls: (!tool_calls.is_empty()).then(|| {
                tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        kind: "function".to_string(),
                        function: WireFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect()
            }),
            tool_call_id: None,
        },
        TranscriptEntry::Tool { call_id, result_json, .. } => WireMessage {
            role: "tool".to_string(),
            content: Some(result_json.clone()),
            tool_calls: None,
            tool_call_id: Some(call_id.clone()),
        },
    }
}

fn to_turn(message: WireMessage) -> ModelTurn {
    let content = message.content.filter(|text| !text.trim().is_empty());
    let calls: Vec<ToolCall> = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            arguments: parse_arguments(&call.function.name, &call.function.arguments),
            name: call.function.name,
        })
        .collect();

    if calls.is_empty() {
        ModelTurn::FinalText(content.unwrap_or_default())
    } else {
        ModelTurn::ToolCallBatch { content, calls }
    }
}

/// Tool arguments arrive as a JSON string; anything that is not an object becomes `{}`.
fn parse_arguments(tool: &str, raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        _ => {
            if !raw.trim().is_empty() {
                warn!(
                    event_name = "agent.provider.arguments_discarded",
                    tool,
                    "tool arguments were not a JSON object"
                );
            }
            Value::Object(Map::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use parley_core::domain::tool::ToolCall;

    use super::{parse_arguments, to_turn, to_wire};
    use crate::llm::{ModelTurn, TranscriptEntry};
    use crate::providers::types::{ChatCompletionResponse, WireMessage};

    #[test]
    fn tool_call_response_is_normalized() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "update_contact", "arguments": "{\"name\":\"Omar\"}" }
                    }]
                }
            }],
            "usage": { "prompt_tokens": 90, "completion_tokens": 10, "total_tokens": 100 }
        }))
        .expect("wire response");

        let message = response.choices.into_iter().next().expect("choice").message;
        match to_turn(message) {
            ModelTurn::ToolCallBatch { content, calls } => {
                assert_eq!(content, None);
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "update_contact");
                assert_eq!(calls[0].arguments, json!({ "name": "Omar" }));
            }
            other => panic!("expected tool batch, got {other:?}"),
        }
    }

    #[test]
    fn plain_text_response_is_final() {
        let message = WireMessage::text("assistant", "Hola Omar");
        assert_eq!(to_turn(message), ModelTurn::FinalText("Hola Omar".to_string()));
    }

    #[test]
    fn malformed_arguments_become_empty_object() {
        assert_eq!(parse_arguments("x", "not json"), json!({}));
        assert_eq!(parse_arguments("x", "[1,2]"), json!({}));
        assert_eq!(parse_arguments("x", ""), json!({}));
    }

    #[test]
    fn transcript_entries_map_to_wire_roles() {
        let call = ToolCall { id: "c1".into(), name: "escalate_to_human".into(), arguments: json!({}) };
        let assistant = to_wire(&TranscriptEntry::Assistant {
            content: None,
            tool_calls: vec![call],
        });
        assert_eq!(assistant.role, "assistant");
        assert_eq!(assistant.tool_calls.as_ref().map(Vec::len), Some(1));

        let tool = to_wire(&TranscriptEntry::Tool {
            call_id: "c1".into(),
            name: "escalate_to_human".into(),
            result_json: "{\"success\":true}".into(),
        });
        assert_eq!(tool.role, "tool");
        assert_eq!(tool.tool_call_id.as_deref(), Some("c1"));
    }
}
