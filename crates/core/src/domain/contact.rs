use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::agent::WorkspaceId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactId(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: ContactId,
    pub workspace_id: WorkspaceId,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub data: BTreeMap<String, Value>,
}

impl ContactRecord {
    pub fn new(id: ContactId, workspace_id: WorkspaceId) -> Self {
        Self { id, workspace_id, name: None, email: None, phone: None, data: BTreeMap::new() }
    }

    /// Fresh contact with a generated id, created when a conversation first captures details.
    pub fn anonymous(workspace_id: WorkspaceId) -> Self {
        Self::new(ContactId(uuid::Uuid::new_v4().to_string()), workspace_id)
    }

    pub fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|name| !name.trim().is_empty())
    }

    pub fn has_reachable_channel(&self) -> bool {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
        present(&self.email) || present(&self.phone)
    }

    /// One-line summary used in handoff notifications.
    pub fn visitor_details(&self) -> String {
        let mut parts = Vec::new();
        if let Some(name) = self.name.as_deref() {
            parts.push(format!("name: {name}"));
        }
        if let Some(email) = self.email.as_deref() {
            parts.push(format!("email: {email}"));
        }
        if let Some(phone) = self.phone.as_deref() {
            parts.push(format!("phone: {phone}"));
        }
        for (key, value) in &self.data {
            let rendered = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            parts.push(format!("{key}: {rendered}"));
        }
        if parts.is_empty() {
            "anonymous visitor".to_string()
        } else {
            parts.join(", ")
        }
    }
}
