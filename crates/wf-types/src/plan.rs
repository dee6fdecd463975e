use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    PendingApproval,
    InProgress,
    Completed,
    Failed,
    Rejected,
    Restarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    pub agent: String,
    pub status: PlanStepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Durable record mirroring the in-memory `WorkflowState`. Owned by its
/// repository; only the executor and approval manager write it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub session_id: String,
    pub description: String,
    pub status: PlanStatus,
    pub steps: Vec<PlanStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// For a `Restarted` plan, the `plan_id` of the workflow instance that
    /// replaces it (see SPEC_FULL.md Open Question resolution 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restarted_into: Option<String>,
}

impl Plan {
    pub fn new(id: String, session_id: String, description: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            session_id,
            description,
            status: PlanStatus::Pending,
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
            restarted_into: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
