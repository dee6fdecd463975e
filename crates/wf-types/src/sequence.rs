use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// C3 output: an ordered agent list with rationale and a complexity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSequence {
    pub agents: Vec<String>,
    pub reasoning: HashMap<String, String>,
    pub complexity_score: f64,
    pub estimated_duration_s: u64,
}

impl AgentSequence {
    pub fn minimum_viable() -> Self {
        Self {
            agents: vec!["planner".to_string(), "analysis".to_string()],
            reasoning: HashMap::new(),
            complexity_score: 0.0,
            estimated_duration_s: 0,
        }
    }

    pub fn is_non_empty(&self) -> bool {
        !self.agents.is_empty()
    }
}

/// C2 registry entry: name plus capability metadata. Opaque to the core —
/// the core never inspects an agent's internals, only this metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub name: String,
    pub description: String,
    /// If true, a downstream agent failing to produce data for this agent
    /// does not fail the whole workflow (spec.md §4.9, Authoritative policy).
    pub tolerates_missing_upstream: bool,
}

impl AgentMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tolerates_missing_upstream: false,
        }
    }
}
