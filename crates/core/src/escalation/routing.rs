use serde::{Deserialize, Serialize};

use crate::domain::agent::HandoffTarget;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Department,
    LegacyAddress,
    WorkspaceOwner,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRoute {
    pub recipient: String,
    pub department: Option<String>,
    pub source: RouteSource,
}

/// Picks who receives a handoff: the requested department, then the agent's single
/// fallback address, then the workspace owner.
pub fn resolve_route(
    department_id: Option<&str>,
    targets: &[HandoffTarget],
    legacy_email: Option<&str>,
    owner_email: &str,
) -> HandoffRoute {
    let requested = department_id.map(str::trim).filter(|id| !id.is_empty());
    if let Some(target) =
        requested.and_then(|id| targets.iter().find(|target| target.id == id))
    {
        return HandoffRoute {
            recipient: target.email.clone(),
            department: Some(target.name.clone()),
            source: RouteSource::Department,
        };
    }

    if let Some(email) = legacy_email.map(str::trim).filter(|email| !email.is_empty()) {
        return HandoffRoute {
            recipient: email.to_owned(),
            department: None,
            source: RouteSource::LegacyAddress,
        };
    }

    HandoffRoute {
        recipient: owner_email.to_owned(),
        department: None,
        source: RouteSource::WorkspaceOwner,
    }
}
