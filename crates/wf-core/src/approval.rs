use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use wf_types::{ApprovalRecord, PlanApproval, ResultApproval, WorkflowStateEnum};

use crate::error::{Result, WorkflowError};

fn transition_allowed(from: WorkflowStateEnum, to: WorkflowStateEnum) -> bool {
    use WorkflowStateEnum::*;
    matches!(
        (from, to),
        (Planning, AwaitingPlanApproval)
            | (AwaitingPlanApproval, PlanApproved)
            | (AwaitingPlanApproval, PlanRejected)
            | (PlanApproved, Executing)
            | (Executing, AwaitingResultApproval)
            | (Executing, Failed)
            | (Executing, Timeout)
            | (AwaitingResultApproval, Completed)
            | (AwaitingResultApproval, Restarted)
            | (AwaitingResultApproval, Failed)
    )
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StateStatistics {
    pub total: usize,
    pub by_state: HashMap<String, usize>,
    pub locked_plans: usize,
}

/// C6: the approval state machine plus the per-`plan_id` execution lock.
/// Grounded on the Python `ApprovalStateManager` (`execution_locks: Set[str]`,
/// `get_state_statistics`) and `tandem-orchestrator`'s pure-reduce style for
/// the transition table itself.
pub struct ApprovalStateManager {
    records: RwLock<HashMap<String, ApprovalRecord>>,
    execution_locks: RwLock<HashSet<String>>,
}

impl ApprovalStateManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: RwLock::new(HashMap::new()),
            execution_locks: RwLock::new(HashSet::new()),
        })
    }

    async fn transition(&self, plan_id: &str, to: WorkflowStateEnum) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .entry(plan_id.to_string())
            .or_insert_with(ApprovalRecord::new);
        if !transition_allowed(record.current_state, to) {
            return Err(WorkflowError::InvalidTransition {
                from: format!("{:?}", record.current_state),
                to: format!("{to:?}"),
            });
        }
        record.transition_to(to);
        Ok(())
    }

    /// Registers a freshly-planned workflow and moves it to
    /// `AWAITING_PLAN_APPROVAL`.
    pub async fn mark_planned(&self, plan_id: &str) -> Result<()> {
        {
            let mut records = self.records.write().await;
            records.entry(plan_id.to_string()).or_insert_with(ApprovalRecord::new);
        }
        self.transition(plan_id, WorkflowStateEnum::AwaitingPlanApproval).await
    }

    pub async fn submit_plan_approval(
        &self,
        plan_id: &str,
        approved: bool,
        original_sequence: Vec<String>,
        approved_sequence: Vec<String>,
        feedback: Option<String>,
    ) -> Result<()> {
        let sequence_modified = original_sequence != approved_sequence;
        let next = if approved {
            WorkflowStateEnum::PlanApproved
        } else {
            WorkflowStateEnum::PlanRejected
        };
        self.transition(plan_id, next).await?;

        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(plan_id) {
            record.plan_approval = Some(PlanApproval {
                approved,
                original_sequence,
                approved_sequence,
                feedback,
                approved_at: Utc::now(),
                sequence_modified,
            });
        }
        Ok(())
    }

    pub async fn mark_executing(&self, plan_id: &str) -> Result<()> {
        self.transition(plan_id, WorkflowStateEnum::Executing).await
    }

    pub async fn mark_awaiting_result_approval(&self, plan_id: &str) -> Result<()> {
        self.transition(plan_id, WorkflowStateEnum::AwaitingResultApproval)
            .await
    }

    pub async fn submit_result_approval(
        &self,
        plan_id: &str,
        approved: bool,
        final_results: serde_json::Value,
        feedback: Option<String>,
    ) -> Result<()> {
        let next = if approved {
            WorkflowStateEnum::Completed
        } else {
            WorkflowStateEnum::Restarted
        };
        self.transition(plan_id, next).await?;

        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(plan_id) {
            record.result_approval = Some(ResultApproval {
                approved,
                final_results,
                feedback,
                approved_at: Utc::now(),
            });
        }
        Ok(())
    }

    pub async fn mark_failed(&self, plan_id: &str) -> Result<()> {
        self.transition(plan_id, WorkflowStateEnum::Failed).await
    }

    pub async fn mark_timeout(&self, plan_id: &str) -> Result<()> {
        self.transition(plan_id, WorkflowStateEnum::Timeout).await
    }

    /// Unconditionally forces a workflow to `FAILED`, bypassing the
    /// transition table — cancellation can happen from any non-terminal
    /// state (spec.md §4.4 "cancellation").
    pub async fn cancel(&self, plan_id: &str) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .entry(plan_id.to_string())
            .or_insert_with(ApprovalRecord::new);
        if record.current_state.is_terminal() {
            return Err(WorkflowError::InvalidTransition {
                from: format!("{:?}", record.current_state),
                to: "Failed".into(),
            });
        }
        record.transition_to(WorkflowStateEnum::Failed);
        drop(records);
        self.release_execution_lock(plan_id).await;
        Ok(())
    }

    pub async fn is_plan_approved(&self, plan_id: &str) -> bool {
        self.records
            .read()
            .await
            .get(plan_id)
            .map(|r| r.current_state == WorkflowStateEnum::PlanApproved)
            .unwrap_or(false)
    }

    /// Execution may only proceed while the workflow sits in an
    /// execution-eligible state and the per-plan lock isn't already held by
    /// another runner.
    pub async fn is_execution_allowed(&self, plan_id: &str) -> bool {
        let allowed_state = self
            .records
            .read()
            .await
            .get(plan_id)
            .map(|r| {
                matches!(
                    r.current_state,
                    WorkflowStateEnum::PlanApproved | WorkflowStateEnum::Executing
                )
            })
            .unwrap_or(false);
        allowed_state
    }

    pub async fn current_state(&self, plan_id: &str) -> Option<WorkflowStateEnum> {
        self.records.read().await.get(plan_id).map(|r| r.current_state)
    }

    pub async fn record(&self, plan_id: &str) -> Option<ApprovalRecord> {
        self.records.read().await.get(plan_id).cloned()
    }

    /// Atomically acquires the non-recursive per-plan execution lock.
    /// Returns `Err(LockAlreadyHeld)` if another runner already holds it.
    pub async fn acquire_execution_lock(&self, plan_id: &str) -> Result<()> {
        let mut locks = self.execution_locks.write().await;
        if !locks.insert(plan_id.to_string()) {
            return Err(WorkflowError::LockAlreadyHeld(plan_id.to_string()));
        }
        Ok(())
    }

    /// Unconditional release; safe to call even if the lock was never held.
    pub async fn release_execution_lock(&self, plan_id: &str) {
        self.execution_locks.write().await.remove(plan_id);
    }

    pub async fn is_locked(&self, plan_id: &str) -> bool {
        self.execution_locks.read().await.contains(plan_id)
    }

    /// Aggregate state counts across all tracked workflows (supplemented
    /// feature, per Python `get_state_statistics`).
    pub async fn get_state_statistics(&self) -> StateStatistics {
        let records = self.records.read().await;
        let mut by_state: HashMap<String, usize> = HashMap::new();
        for record in records.values() {
            *by_state.entry(format!("{:?}", record.current_state)).or_insert(0) += 1;
        }
        StateStatistics {
            total: records.len(),
            by_state,
            locked_plans: self.execution_locks.read().await.len(),
        }
    }

    /// Drops records for workflows that reached a terminal state before
    /// `cutoff` (Python `cleanup_completed_workflows`).
    pub async fn cleanup_completed_workflows(&self, cutoff: chrono::DateTime<Utc>) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !(record.current_state.is_terminal() && record.state_changed_at < cutoff));
        before - records.len()
    }
}

impl Default for ApprovalStateManager {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            execution_locks: RwLock::new(HashSet::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn happy_path_transitions_through_to_completed() {
        let manager = ApprovalStateManager::new();
        manager.mark_planned("p1").await.unwrap();
        manager
            .submit_plan_approval("p1", true, vec!["planner".into()], vec!["planner".into()], None)
            .await
            .unwrap();
        assert!(manager.is_plan_approved("p1").await);

        manager.mark_executing("p1").await.unwrap();
        assert!(manager.is_execution_allowed("p1").await);

        manager.mark_awaiting_result_approval("p1").await.unwrap();
        manager
            .submit_result_approval("p1", true, serde_json::json!({"ok": true}), None)
            .await
            .unwrap();

        assert_eq!(
            manager.current_state("p1").await,
            Some(WorkflowStateEnum::Completed)
        );
    }

    #[tokio::test]
    async fn disallowed_transition_is_rejected() {
        let manager = ApprovalStateManager::new();
        let err = manager.mark_executing("p1").await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn execution_lock_is_exclusive_and_unconditionally_releasable() {
        let manager = ApprovalStateManager::new();
        manager.acquire_execution_lock("p1").await.unwrap();
        let err = manager.acquire_execution_lock("p1").await.unwrap_err();
        assert!(matches!(err, WorkflowError::LockAlreadyHeld(_)));

        manager.release_execution_lock("p1").await;
        manager.release_execution_lock("p1").await; // idempotent
        manager.acquire_execution_lock("p1").await.unwrap();
    }

    #[tokio::test]
    async fn cancel_forces_failed_from_any_non_terminal_state() {
        let manager = ApprovalStateManager::new();
        manager.mark_planned("p1").await.unwrap();
        manager.acquire_execution_lock("p1").await.unwrap();
        manager.cancel("p1").await.unwrap();
        assert_eq!(manager.current_state("p1").await, Some(WorkflowStateEnum::Failed));
        assert!(!manager.is_locked("p1").await);
    }

    #[tokio::test]
    async fn statistics_count_by_state_and_locks() {
        let manager = ApprovalStateManager::new();
        manager.mark_planned("p1").await.unwrap();
        manager.mark_planned("p2").await.unwrap();
        manager.acquire_execution_lock("p1").await.unwrap();

        let stats = manager.get_state_statistics().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.locked_plans, 1);
    }
}
