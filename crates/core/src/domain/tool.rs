use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Provider-agnostic tool invocation requested by a model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: Value },
    Failure { error: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, payload: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Success { payload },
        }
    }

    pub fn failure(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Failure { error: error.into() },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    /// JSON body submitted back to the model for this call.
    pub fn result_json(&self) -> String {
        let body = match &self.outcome {
            ToolOutcome::Success { payload } => json!({ "success": true, "result": payload }),
            ToolOutcome::Failure { error } => json!({ "success": false, "error": error }),
        };
        body.to_string()
    }
}
