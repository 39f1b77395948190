use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use parley_core::domain::agent::{CustomFieldDefinition, FieldType};
use parley_core::domain::contact::ContactRecord;
use parley_core::domain::tool::ToolCall;
use parley_core::prompt::UPDATE_CONTACT_TOOL;
use parley_core::reconciliation::partition_update;
use parley_db::repositories::{AgentRepository, ContactRepository, ConversationRepository};

use super::{arguments_object, Capability, ToolContext, ToolError};
use crate::llm::ToolDescriptor;

/// `update_contact`: merges captured visitor details into the conversation's contact.
pub struct ContactCapability {
    contacts: Arc<dyn ContactRepository>,
    conversations: Arc<dyn ConversationRepository>,
    agents: Arc<dyn AgentRepository>,
    fields: Vec<CustomFieldDefinition>,
}

impl ContactCapability {
    pub fn new(
        contacts: Arc<dyn ContactRepository>,
        conversations: Arc<dyn ConversationRepository>,
        agents: Arc<dyn AgentRepository>,
        fields: Vec<CustomFieldDefinition>,
    ) -> Self {
        Self { contacts, conversations, agents, fields }
    }

    /// Contacts belong to the workspace, so any agent's declared field is accepted.
    /// The calling agent's own keys come first and win exact-match lookups.
    async fn declared_keys(&self, context: &ToolContext) -> Result<Vec<String>, ToolError> {
        let mut keys: Vec<String> = self.fields.iter().map(|field| field.key.clone()).collect();
        for key in self.agents.custom_field_keys_for_workspace(&context.workspace.id).await? {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl Capability for ContactCapability {
    fn tools(&self) -> Vec<ToolDescriptor> {
        let mut properties = Map::new();
        properties.insert("name".into(), json!({ "type": "string", "description": "Visitor's name as they gave it" }));
        properties.insert("email".into(), json!({ "type": "string", "description": "Visitor's email address" }));
        properties.insert("phone".into(), json!({ "type": "string", "description": "Visitor's phone number" }));
        for field in &self.fields {
            properties.insert(field.key.clone(), field_schema(field));
        }

        vec![ToolDescriptor::new(
            UPDATE_CONTACT_TOOL,
            "Save details the visitor shared about themselves. Call it as soon as a detail is mentioned.",
            json!({ "type": "object", "properties": properties }),
        )]
    }

    async fn invoke(&self, call: &ToolCall, context: &ToolContext) -> Result<Value, ToolError> {
        let patch = partition_update(arguments_object(call)?, &self.declared_keys(context).await?)?;

        // Held across the whole update; one batch may carry several update_contact calls.
        let mut linked = context.contact_id.lock().await;
        let (mut contact, created) = match linked.as_ref() {
            Some(id) => {
                let contact = self
                    .contacts
                    .find_contact(id)
                    .await?
                    .ok_or_else(|| ToolError::NotFound(format!("contact `{}` was not found", id.0)))?;
                (contact, false)
            }
            None => (ContactRecord::anonymous(context.workspace.id.clone()), true),
        };

        patch.apply_to(&mut contact);
        self.contacts.save_contact(contact.clone()).await?;
        if created {
            self.conversations.link_contact(&context.conversation_id, &contact.id).await?;
            *linked = Some(contact.id.clone());
        }

        info!(
            event_name = "agent.tool.contact_updated",
            conversation_id = %context.conversation_id.0,
            contact_id = %contact.id.0,
            created,
            updated = patch.updated_keys().len(),
            ignored = patch.dropped.len(),
            "contact reconciled"
        );
        Ok(json!({ "updated": patch.updated_keys(), "ignored": patch.dropped }))
    }
}

fn field_schema(field: &CustomFieldDefinition) -> Value {
    let kind = match field.field_type {
        FieldType::Number => "number",
        FieldType::Boolean => "boolean",
        FieldType::Text | FieldType::Date | FieldType::Select => "string",
    };
    let mut description = field.label.clone();
    if let Some(extra) = field.description.as_deref().filter(|text| !text.trim().is_empty()) {
        description.push_str(". ");
        description.push_str(extra.trim());
    }
    if field.field_type == FieldType::Date {
        description.push_str(" (YYYY-MM-DD)");
    }

    let mut schema = json!({ "type": kind, "description": description });
    if field.field_type == FieldType::Select && !field.options.is_empty() {
        schema["enum"] = json!(field.options);
    }
    schema
}
