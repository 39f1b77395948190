#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailIntent<'a> {
    InvokeTool { name: &'a str },
}

impl GuardrailIntent<'_> {
    pub fn action_key(&self) -> String {
        match self {
            Self::InvokeTool { name } => format!("tool.{name}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String, fallback_path: &'static str },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Server-side checks that hold no matter what the model decides to call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub offered_tools: Vec<String>,
}

impl GuardrailPolicy {
    pub fn with_offered_tools(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.offered_tools = names.into_iter().collect();
        self
    }

    pub fn evaluate(&self, intent: &GuardrailIntent<'_>) -> GuardrailDecision {
        match intent {
            GuardrailIntent::InvokeTool { name } if self.offered_tools.iter().any(|t| t == name) => {
                GuardrailDecision::Allow
            }
            GuardrailIntent::InvokeTool { name } => GuardrailDecision::Deny {
                reason_code: "tool_not_offered",
                user_message: format!("Tool `{name}` is not available in this conversation."),
                fallback_path: "answer_without_tool",
            },
        }
    }
}
