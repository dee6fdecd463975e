use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// C6 state machine, per spec.md §3/§4.4:
/// `PLANNING -> AWAITING_PLAN_APPROVAL -> (PLAN_APPROVED | PLAN_REJECTED)
/// -> EXECUTING -> AWAITING_RESULT_APPROVAL -> (COMPLETED | RESTARTED |
/// FAILED | TIMEOUT)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStateEnum {
    Planning,
    AwaitingPlanApproval,
    PlanApproved,
    PlanRejected,
    Executing,
    AwaitingResultApproval,
    Completed,
    Restarted,
    Failed,
    Timeout,
}

impl WorkflowStateEnum {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStateEnum::Completed
                | WorkflowStateEnum::Restarted
                | WorkflowStateEnum::Failed
                | WorkflowStateEnum::Timeout
                | WorkflowStateEnum::PlanRejected
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanApproval {
    pub approved: bool,
    pub original_sequence: Vec<String>,
    pub approved_sequence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub approved_at: DateTime<Utc>,
    pub sequence_modified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultApproval {
    pub approved: bool,
    pub final_results: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub approved_at: DateTime<Utc>,
}

/// Per-`plan_id` approval audit record (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub current_state: WorkflowStateEnum,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<WorkflowStateEnum>,
    pub state_changed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_approval: Option<PlanApproval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_approval: Option<ResultApproval>,
}

impl ApprovalRecord {
    pub fn new() -> Self {
        Self {
            current_state: WorkflowStateEnum::Planning,
            previous_state: None,
            state_changed_at: Utc::now(),
            plan_approval: None,
            result_approval: None,
        }
    }

    pub fn transition_to(&mut self, next: WorkflowStateEnum) {
        self.previous_state = Some(self.current_state);
        self.current_state = next;
        self.state_changed_at = Utc::now();
    }
}

impl Default for ApprovalRecord {
    fn default() -> Self {
        Self::new()
    }
}
