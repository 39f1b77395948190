//! Channel-facing HTTP surface.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use parley_agent::runtime::{AgentRuntime, ReplyOutcome};
use parley_core::domain::agent::AgentId;
use parley_core::domain::conversation::ConversationId;
use parley_core::errors::{ApplicationError, DomainError, InterfaceError};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub correlation_id: String,
}

pub struct ApiError(InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn reject(error: impl Into<ApplicationError>, correlation_id: &str) -> ApiError {
    let error = error.into();
    warn!(
        event_name = "system.api.request_failed",
        correlation_id,
        error = %error,
        "reply request failed"
    );
    ApiError(error.into_interface(correlation_id))
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/agents/{agent_id}/conversations/{conversation_id}/reply", post(reply))
        .with_state(state)
}

/// Stores the inbound visitor message and runs one reply cycle for it.
pub async fn reply(
    State(state): State<ApiState>,
    Path((agent_id, conversation_id)): Path<(String, String)>,
    Json(body): Json<ReplyRequest>,
) -> Result<Json<ReplyOutcome>, ApiError> {
    let correlation_id = uuid::Uuid::new_v4().to_string();
    let message = body.message.trim();
    if message.is_empty() {
        return Err(reject(
            DomainError::InvariantViolation("message must not be empty".to_string()),
            &correlation_id,
        ));
    }

    let outcome = state
        .runtime
        .receive_and_reply(&AgentId(agent_id), &ConversationId(conversation_id), message)
        .await
        .map_err(|error| reject(error, &correlation_id))?;
    Ok(Json(outcome))
}
