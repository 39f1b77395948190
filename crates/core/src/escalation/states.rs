use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscalationEvent {
    HandoffRequested,
    HumanClaimed,
    ConversationClosed,
    Reopened,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscalationAction {
    NotifyHandoffTarget,
    SilenceAgent,
    ResumeAgent,
}

/// Facts about the conversation the engine checks before a handoff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EscalationContext {
    pub enforce_contact_requirements: bool,
    pub missing_contact_fields: Vec<String>,
}

impl EscalationContext {
    pub fn unchecked() -> Self {
        Self::default()
    }

    /// Builds the context from what is known about the visitor. A handoff needs a name and at
    /// least one reachable channel.
    pub fn from_contact(enforce: bool, has_name: bool, has_channel: bool) -> Self {
        let mut missing_contact_fields = Vec::new();
        if !has_name {
            missing_contact_fields.push("name".to_owned());
        }
        if !has_channel {
            missing_contact_fields.push("email or phone".to_owned());
        }
        Self { enforce_contact_requirements: enforce, missing_contact_fields }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ConversationStatus,
    pub to: ConversationStatus,
    pub event: EscalationEvent,
    pub actions: Vec<EscalationAction>,
}

impl TransitionOutcome {
    pub fn notifies(&self) -> bool {
        self.actions.contains(&EscalationAction::NotifyHandoffTarget)
    }
}
