use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::contact::ContactRecord;

const STANDARD_FIELDS: [&str; 3] = ["name", "email", "phone"];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReconciliationError {
    #[error("none of the supplied keys are standard or declared fields: {rejected:?}")]
    NoValidKeys { rejected: Vec<String> },
}

/// Partitioned result of matching raw extracted keys against the contact schema.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub custom: BTreeMap<String, Value>,
    pub dropped: Vec<String>,
}

impl ContactPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.phone.is_none() && self.custom.is_empty()
    }

    pub fn updated_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for (key, value) in [("name", &self.name), ("email", &self.email), ("phone", &self.phone)] {
            if value.is_some() {
                keys.push(key.to_owned());
            }
        }
        keys.extend(self.custom.keys().cloned());
        keys
    }

    pub fn apply_to(&self, contact: &mut ContactRecord) {
        if let Some(name) = &self.name {
            contact.name = Some(name.clone());
        }
        if let Some(email) = &self.email {
            contact.email = Some(email.clone());
        }
        if let Some(phone) = &self.phone {
            contact.phone = Some(phone.clone());
        }
        for (key, value) in &self.custom {
            contact.data.insert(key.clone(), value.clone());
        }
    }
}

/// Matches each raw key to a standard column or a declared custom field. Exact custom-key
/// matches win over case-insensitive ones; anything else is dropped.
pub fn partition_update(
    raw: &Map<String, Value>,
    declared_keys: &[String],
) -> Result<ContactPatch, ReconciliationError> {
    let mut patch = ContactPatch::default();

    for (key, value) in raw {
        if value.is_null() {
            patch.dropped.push(key.clone());
            continue;
        }

        let lowered = key.trim().to_ascii_lowercase();
        if STANDARD_FIELDS.contains(&lowered.as_str()) {
            let Some(text) = scalar_text(value) else {
                patch.dropped.push(key.clone());
                continue;
            };
            match lowered.as_str() {
                "name" => patch.name = Some(text),
                "email" => patch.email = Some(text),
                _ => patch.phone = Some(text),
            }
            continue;
        }

        match match_declared(key, declared_keys) {
            Some(declared) => {
                patch.custom.insert(declared.to_owned(), value.clone());
            }
            None => patch.dropped.push(key.clone()),
        }
    }

    if patch.is_empty() {
        return Err(ReconciliationError::NoValidKeys { rejected: patch.dropped });
    }
    Ok(patch)
}

/// Partitions the update and merges it into the contact in one step.
pub fn reconcile(
    contact: &mut ContactRecord,
    raw: &Map<String, Value>,
    declared_keys: &[String],
) -> Result<ContactPatch, ReconciliationError> {
    let patch = partition_update(raw, declared_keys)?;
    patch.apply_to(contact);
    Ok(patch)
}

fn match_declared<'a>(key: &str, declared_keys: &'a [String]) -> Option<&'a str> {
    if let Some(exact) = declared_keys.iter().find(|declared| declared.as_str() == key) {
        return Some(exact.as_str());
    }
    let lowered = key.trim().to_lowercase();
    declared_keys
        .iter()
        .find(|declared| declared.to_lowercase() == lowered)
        .map(String::as_str)
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_owned(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
