use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::conversation::ConversationStatus;
use crate::escalation::states::{
    EscalationAction, EscalationContext, EscalationEvent, TransitionOutcome,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EscalationTransitionError {
    #[error("handoff requires contact details first, missing: {missing_fields:?}")]
    MissingContactFields { missing_fields: Vec<String> },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: ConversationStatus, event: EscalationEvent },
}

/// Lifecycle of a conversation between the automated agent and a human operator.
#[derive(Clone, Copy, Debug, Default)]
pub struct EscalationEngine;

impl EscalationEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_state(&self) -> ConversationStatus {
        ConversationStatus::Active
    }

    pub fn apply(
        &self,
        current: ConversationStatus,
        event: EscalationEvent,
        context: &EscalationContext,
    ) -> Result<TransitionOutcome, EscalationTransitionError> {
        use ConversationStatus::{Active, Closed, Pending};
        use EscalationAction::{NotifyHandoffTarget, ResumeAgent, SilenceAgent};
        use EscalationEvent::{ConversationClosed, HandoffRequested, HumanClaimed, Reopened};

        let (to, actions) = match (current, event) {
            (Active, HandoffRequested) => {
                if context.enforce_contact_requirements
                    && !context.missing_contact_fields.is_empty()
                {
                    return Err(EscalationTransitionError::MissingContactFields {
                        missing_fields: context.missing_contact_fields.clone(),
                    });
                }
                (Pending, vec![NotifyHandoffTarget, SilenceAgent])
            }
            (Pending, HumanClaimed) => (Active, vec![ResumeAgent]),
            (Active, ConversationClosed) | (Pending, ConversationClosed) => (Closed, Vec::new()),
            (Closed, Reopened) => (Active, vec![ResumeAgent]),
            _ => {
                return Err(EscalationTransitionError::InvalidTransition { state: current, event });
            }
        };

        Ok(TransitionOutcome { from: current, to, event, actions })
    }

    pub fn apply_with_audit<S>(
        &self,
        current: ConversationStatus,
        event: EscalationEvent,
        context: &EscalationContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, EscalationTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => sink.emit(
                AuditEvent::new(
                    audit,
                    "escalation.transition_applied",
                    AuditCategory::Escalation,
                    AuditOutcome::Success,
                )
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", outcome.to.as_str())
                .with_metadata("event", format!("{:?}", outcome.event)),
            ),
            Err(error) => sink.emit(
                AuditEvent::new(
                    audit,
                    "escalation.transition_rejected",
                    AuditCategory::Escalation,
                    AuditOutcome::Rejected,
                )
                .with_metadata("from", current.as_str())
                .with_metadata("error", error.to_string()),
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::domain::conversation::{ConversationId, ConversationStatus};
    use crate::escalation::engine::{EscalationEngine, EscalationTransitionError};
    use crate::escalation::states::{EscalationAction, EscalationContext, EscalationEvent};

    #[test]
    fn handoff_moves_active_conversation_to_pending_and_notifies_once() {
        let engine = EscalationEngine::new();
        let outcome = engine
            .apply(
                engine.initial_state(),
                EscalationEvent::HandoffRequested,
                &EscalationContext::unchecked(),
            )
            .expect("active -> pending");

        assert_eq!(outcome.to, ConversationStatus::Pending);
        let notifications = outcome
            .actions
            .iter()
            .filter(|action| **action == EscalationAction::NotifyHandoffTarget)
            .count();
        assert_eq!(notifications, 1);
    }

    #[test]
    fn pending_conversation_cannot_be_escalated_twice() {
        let error = EscalationEngine::new()
            .apply(
                ConversationStatus::Pending,
                EscalationEvent::HandoffRequested,
                &EscalationContext::unchecked(),
            )
            .expect_err("pending -> pending must fail");

        assert_eq!(
            error,
            EscalationTransitionError::InvalidTransition {
                state: ConversationStatus::Pending,
                event: EscalationEvent::HandoffRequested,
            }
        );
    }

    #[test]
    fn enforced_contact_requirements_block_anonymous_handoff() {
        let context = EscalationContext::from_contact(true, true, false);
        let error = EscalationEngine::new()
            .apply(ConversationStatus::Active, EscalationEvent::HandoffRequested, &context)
            .expect_err("missing channel");

        assert_eq!(
            error,
            EscalationTransitionError::MissingContactFields {
                missing_fields: vec!["email or phone".to_owned()]
            }
        );
    }

    #[test]
    fn unenforced_contact_requirements_allow_handoff() {
        let context = EscalationContext::from_contact(false, false, false);
        let outcome = EscalationEngine::new()
            .apply(ConversationStatus::Active, EscalationEvent::HandoffRequested, &context)
            .expect("guardrail disabled");
        assert!(outcome.notifies());
    }

    #[test]
    fn human_claims_then_closes_then_visitor_reopens() {
        let engine = EscalationEngine::new();
        let context = EscalationContext::unchecked();

        let claimed = engine
            .apply(ConversationStatus::Pending, EscalationEvent::HumanClaimed, &context)
            .expect("pending -> active");
        assert_eq!(claimed.to, ConversationStatus::Active);

        let closed = engine
            .apply(claimed.to, EscalationEvent::ConversationClosed, &context)
            .expect("active -> closed");
        assert_eq!(closed.to, ConversationStatus::Closed);

        let reopened = engine
            .apply(closed.to, EscalationEvent::Reopened, &context)
            .expect("closed -> active");
        assert_eq!(reopened.to, ConversationStatus::Active);
        assert!(!reopened.notifies());
    }

    #[test]
    fn audited_transitions_record_success_and_rejection() {
        let engine = EscalationEngine::new();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(
            Some(ConversationId("conv-1".to_owned())),
            None,
            "req-1",
            "tool:escalate_to_human",
        );

        engine
            .apply_with_audit(
                ConversationStatus::Active,
                EscalationEvent::HandoffRequested,
                &EscalationContext::unchecked(),
                &sink,
                &audit,
            )
            .expect("applied");
        let _ = engine.apply_with_audit(
            ConversationStatus::Closed,
            EscalationEvent::HumanClaimed,
            &EscalationContext::unchecked(),
            &sink,
            &audit,
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "escalation.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("PENDING"));
        assert_eq!(events[1].outcome, AuditOutcome::Rejected);
    }
}
