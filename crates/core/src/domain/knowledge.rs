use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassageId(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgePassage {
    pub id: PassageId,
    pub agent_id: AgentId,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
}
