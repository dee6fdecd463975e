use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The outcome recorded for one agent invocation within a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Partial,
    Failed,
}

/// One entry in `WorkflowState::execution_results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub agent: String,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// C1: the typed record threaded through the graph. Each node returns a new
/// state that the executor merges; this struct is never mutated in place by
/// an agent, only by the executor between steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub plan_id: String,
    pub session_id: String,
    pub task_description: String,
    pub agent_sequence: Vec<String>,
    pub current_step: usize,
    pub messages: Vec<String>,
    pub collected_data: HashMap<String, serde_json::Value>,
    pub execution_results: Vec<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<serde_json::Value>,
    pub approval_required: bool,
    pub awaiting_user_input: bool,
}

impl WorkflowState {
    pub fn new(
        plan_id: String,
        session_id: String,
        task_description: String,
        agent_sequence: Vec<String>,
        approval_required: bool,
    ) -> Self {
        Self {
            plan_id,
            session_id,
            task_description,
            agent_sequence,
            current_step: 0,
            messages: Vec::new(),
            collected_data: HashMap::new(),
            execution_results: Vec::new(),
            final_result: None,
            approval_required,
            awaiting_user_input: false,
        }
    }

    /// `current_step <= len(agent_sequence)`.
    pub fn current_step_in_bounds(&self) -> bool {
        self.current_step <= self.agent_sequence.len()
    }

    /// `collected_data[a]` exists iff `a` has a completed-or-partial entry
    /// in `execution_results`.
    pub fn collected_data_consistent(&self) -> bool {
        for agent in self.collected_data.keys() {
            let has_success = self.execution_results.iter().any(|r| {
                &r.agent == agent
                    && matches!(r.status, ExecutionStatus::Completed | ExecutionStatus::Partial)
            });
            if !has_success {
                return false;
            }
        }
        true
    }

    /// `final_result` is set iff the sequence ran to completion without a
    /// trailing error.
    pub fn final_result_consistent(&self) -> bool {
        let at_end = self.current_step == self.agent_sequence.len();
        let last_ok = self
            .execution_results
            .last()
            .map(|r| !matches!(r.status, ExecutionStatus::Failed))
            .unwrap_or(false);
        self.final_result.is_some() == (at_end && last_ok)
    }

    pub fn merge_step(
        &mut self,
        agent_name: &str,
        new_messages: Vec<String>,
        agent_output: serde_json::Value,
        result: ExecutionResult,
    ) {
        self.messages.extend(new_messages);
        self.collected_data
            .insert(agent_name.to_string(), agent_output);
        self.execution_results.push(result);
        self.current_step += 1;
    }
}
