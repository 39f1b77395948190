use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use parley_core::audit::AuditContext;
use parley_core::domain::agent::{AgentConfig, HandoffTarget};
use parley_core::domain::tool::ToolCall;
use parley_core::escalation::{
    resolve_route, EscalationContext, EscalationEngine, EscalationEvent, EscalationTransitionError,
};
use parley_core::prompt::ESCALATE_TOOL;

use super::{arguments_object, optional_str, Capability, ToolContext, ToolError, ToolServices};
use crate::llm::ToolDescriptor;
use crate::notifier::HandoffEmail;

/// `escalate_to_human`: moves the conversation to PENDING and notifies the routed team.
pub struct HandoffCapability {
    services: ToolServices,
    targets: Vec<HandoffTarget>,
    engine: EscalationEngine,
}

impl HandoffCapability {
    pub fn new(services: ToolServices, agent: &AgentConfig) -> Self {
        Self { services, targets: agent.handoff_targets.clone(), engine: EscalationEngine::new() }
    }
}

#[async_trait]
impl Capability for HandoffCapability {
    fn tools(&self) -> Vec<ToolDescriptor> {
        let mut properties = json!({
            "reason": { "type": "string", "description": "Why the visitor needs a person" },
            "summary": { "type": "string", "description": "Short summary of the conversation so far" },
        });
        if !self.targets.is_empty() {
            let ids: Vec<&str> = self.targets.iter().map(|target| target.id.as_str()).collect();
            properties["department_id"] = json!({
                "type": "string",
                "enum": ids,
                "description": "Team that should take over, from the handoff protocol",
            });
        }

        vec![ToolDescriptor::new(
            ESCALATE_TOOL,
            "Transfer the conversation to a human teammate. Requires the visitor's name and an email or phone already saved.",
            json!({ "type": "object", "properties": properties, "required": ["reason"] }),
        )]
    }

    async fn invoke(&self, call: &ToolCall, context: &ToolContext) -> Result<Value, ToolError> {
        let arguments = arguments_object(call)?;
        let reason = optional_str(arguments, "reason").unwrap_or("visitor asked for a person");
        let summary = optional_str(arguments, "summary").unwrap_or(reason).to_string();
        let department_id = optional_str(arguments, "department_id");

        let contact = match context.contact_id().await {
            Some(id) => self.services.contacts.find_contact(&id).await?,
            None => None,
        };
        let escalation = EscalationContext::from_contact(
            self.services.enforce_contact_requirements,
            contact.as_ref().is_some_and(|contact| contact.has_name()),
            contact.as_ref().is_some_and(|contact| contact.has_reachable_channel()),
        );
        let audit = AuditContext::new(
            Some(context.conversation_id.clone()),
            Some(context.agent.id.clone()),
            context.correlation_id.clone(),
            "agent",
        );

        let mut status = context.status.lock().await;
        let outcome = self
            .engine
            .apply_with_audit(
                *status,
                EscalationEvent::HandoffRequested,
                &escalation,
                self.services.audit.as_ref(),
                &audit,
            )
            .map_err(refusal)?;

        self.services.conversations.update_status(&context.conversation_id, outcome.to).await?;
        *status = outcome.to;
        drop(status);

        let route = resolve_route(
            department_id,
            &self.targets,
            context.agent.legacy_handoff_email.as_deref(),
            &context.workspace.owner_email,
        );
        info!(
            event_name = "agent.handoff.requested",
            conversation_id = %context.conversation_id.0,
            route_source = ?route.source,
            department = route.department.as_deref().unwrap_or("-"),
            "conversation handed to humans"
        );

        if outcome.notifies() {
            let email = HandoffEmail {
                recipient: route.recipient.clone(),
                agent_name: context.agent.name.clone(),
                workspace_name: context.workspace.name.clone(),
                conversation_link: format!(
                    "{}/{}",
                    self.services.conversation_base_url.trim_end_matches('/'),
                    context.conversation_id.0
                ),
                visitor_details: contact
                    .as_ref()
                    .map(|contact| contact.visitor_details())
                    .unwrap_or_else(|| "anonymous visitor".to_string()),
                summary,
            };
            let notifier = self.services.notifier.clone();
            let conversation_id = context.conversation_id.0.clone();
            tokio::spawn(async move {
                if let Err(error) = notifier.send_handoff_email(email).await {
                    warn!(
                        event_name = "agent.handoff.notify_failed",
                        conversation_id = %conversation_id,
                        error = %error,
                        "handoff notification was not delivered"
                    );
                }
            });
        }

        Ok(json!({
            "status": outcome.to.as_str(),
            "routed_to": route.department.unwrap_or_else(|| "support team".to_string()),
            "message": "A teammate has been notified and will join this conversation shortly.",
        }))
    }
}

fn refusal(error: EscalationTransitionError) -> ToolError {
    match error {
        EscalationTransitionError::MissingContactFields { missing_fields } => {
            ToolError::Refused(missing_contact_message(&missing_fields))
        }
        EscalationTransitionError::InvalidTransition { state, .. } => ToolError::Refused(format!(
            "The conversation cannot be transferred while it is {}.",
            state.as_str()
        )),
    }
}

fn missing_contact_message(missing_fields: &[String]) -> String {
    format!(
        "Cannot transfer yet. Ask the visitor for their {}, save it with update_contact, then call escalate_to_human again.",
        missing_fields.join(" and ")
    )
}
