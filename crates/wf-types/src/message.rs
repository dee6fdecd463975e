use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unit of persistence (C8). `sequence_number` is assigned by the
/// persistence component at write time and is strictly increasing per
/// `plan_id` — callers never set it themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub plan_id: String,
    pub agent_name: String,
    pub agent_type: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub sequence_number: u64,
}

impl AgentMessage {
    /// Schema validation per spec.md §4.6: non-empty `plan_id`,
    /// `agent_name`, and `content`.
    pub fn is_well_formed(&self) -> bool {
        !self.plan_id.trim().is_empty()
            && !self.agent_name.trim().is_empty()
            && !self.content.trim().is_empty()
    }
}
