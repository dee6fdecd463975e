use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use wf_types::{ExecutionResult, ExecutionStatus, WorkflowEvent, WorkflowEventType, WorkflowState};

use crate::approval::ApprovalStateManager;
use crate::compiler::Graph;
use crate::context::WorkflowContextService;
use crate::error::{Result, WorkflowError};
use crate::perf::PerformanceMonitor;
use crate::policy::{MockModePolicy, RetryPolicy};
use crate::registry::{Agent, AgentCallResult, AgentRegistry};
use crate::sink::ExecutionSink;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub step_timeout: Duration,
    pub workflow_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(60),
            workflow_timeout: Duration::from_secs(900),
        }
    }
}

/// What `run`/`resume` returned control for: either the graph ran to
/// completion, or it hit a step-wise HITL checkpoint and is parked awaiting
/// `resume(plan_id)` (spec.md §4.3 step 2, §5 suspension point (b)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSignal {
    Completed,
    Suspended,
}

/// The outcome of one retried agent call, classified per spec.md §4.9.
enum StepOutcome {
    Success(AgentCallResult),
    Authoritative(AgentCallResult),
    TransientExhausted(String),
}

/// C5: runs one compiled `Graph` against a `WorkflowState`, one step at a
/// time. Grounded on `src-tauri/src/orchestrator/engine.rs`'s
/// `run_execution_loop`/`execute_task`/`call_agent` (timeout via
/// `tokio::time::timeout`, cooperative cancellation via `CancellationToken`).
pub struct LinearExecutor {
    registry: Arc<AgentRegistry>,
    approvals: Arc<ApprovalStateManager>,
    context: Arc<WorkflowContextService>,
    perf: Arc<PerformanceMonitor>,
    sink: Arc<dyn ExecutionSink>,
    retry_policy: RetryPolicy,
    mock_policy: MockModePolicy,
    config: ExecutorConfig,
}

impl LinearExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AgentRegistry>,
        approvals: Arc<ApprovalStateManager>,
        context: Arc<WorkflowContextService>,
        perf: Arc<PerformanceMonitor>,
        sink: Arc<dyn ExecutionSink>,
        retry_policy: RetryPolicy,
        mock_policy: MockModePolicy,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            approvals,
            context,
            perf,
            sink,
            retry_policy,
            mock_policy,
            config,
        }
    }

    /// Runs `graph` from `state.current_step` (0 on a fresh workflow) until
    /// it completes, suspends at a HITL checkpoint, fails, is cancelled, or
    /// times out. Acquires the per-`plan_id` execution lock; the lock is
    /// held across a `Suspended` return so a second runner can't race a
    /// resumed workflow (spec.md §5 "Suspension points").
    pub async fn run(
        &self,
        plan_id: &str,
        graph: &Graph,
        mut state: WorkflowState,
        cancel: CancellationToken,
    ) -> Result<(WorkflowState, RunSignal)> {
        self.approvals.acquire_execution_lock(plan_id).await?;
        self.approvals.mark_executing(plan_id).await?;
        let started = Instant::now();
        let outcome = self.drive(plan_id, graph, &mut state, cancel).await;
        self.finish_run(plan_id, &outcome, started).await;
        outcome.map(|signal| (state, signal))
    }

    /// Resumes a workflow previously suspended at a step-wise HITL
    /// checkpoint. The execution lock must still be held from the original
    /// `run` call; the resume cursor is `state.current_step` (spec.md §4.3
    /// "idempotence on resume").
    pub async fn resume(
        &self,
        plan_id: &str,
        graph: &Graph,
        mut state: WorkflowState,
        cancel: CancellationToken,
    ) -> Result<(WorkflowState, RunSignal)> {
        if !self.approvals.is_locked(plan_id).await {
            return Err(WorkflowError::InvalidTransition {
                from: "not_suspended".into(),
                to: "resume".into(),
            });
        }
        state.awaiting_user_input = false;
        let started = Instant::now();
        let outcome = self.drive(plan_id, graph, &mut state, cancel).await;
        self.finish_run(plan_id, &outcome, started).await;
        outcome.map(|signal| (state, signal))
    }

    async fn finish_run(&self, plan_id: &str, outcome: &Result<RunSignal>, started: Instant) {
        if matches!(outcome, Ok(RunSignal::Suspended)) {
            return;
        }
        self.approvals.release_execution_lock(plan_id).await;
        self.perf.record_workflow_duration(started.elapsed()).await;
    }

    async fn drive(
        &self,
        plan_id: &str,
        graph: &Graph,
        state: &mut WorkflowState,
        cancel: CancellationToken,
    ) -> Result<RunSignal> {
        let deadline = tokio::time::Instant::now() + self.config.workflow_timeout;

        while state.current_step < graph.nodes.len() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.approvals.cancel(plan_id).await.ok();
                    return Err(WorkflowError::Cancelled(plan_id.to_string()));
                }
                _ = tokio::time::sleep(remaining) => {
                    self.approvals.mark_timeout(plan_id).await.ok();
                    return Err(WorkflowError::TimedOut(plan_id.to_string()));
                }
                outcome = self.run_one_step(plan_id, graph, state) => {
                    outcome?;
                }
            }

            if state.awaiting_user_input {
                return Ok(RunSignal::Suspended);
            }
        }

        self.approvals.mark_awaiting_result_approval(plan_id).await?;
        Ok(RunSignal::Completed)
    }

    async fn emit(&self, plan_id: &str, event: WorkflowEvent) {
        self.sink.on_event(plan_id, &event).await;
        self.context.add_event(plan_id, event).await;
    }

    async fn run_one_step(&self, plan_id: &str, graph: &Graph, state: &mut WorkflowState) -> Result<()> {
        let node = &graph.nodes[state.current_step];
        let agent_name = node.agent_name.clone();
        let requires_approval_after = node.requires_approval_after;
        let agent = self
            .registry
            .get(&agent_name)
            .ok_or_else(|| WorkflowError::UnknownAgent(agent_name.clone()))?;

        self.emit(
            plan_id,
            WorkflowEvent::new(WorkflowEventType::AgentStarted, "agent started")
                .with_agent(agent_name.clone()),
        )
        .await;

        let started = Instant::now();
        let step_outcome = self.call_with_retry(&agent, state, &agent_name).await;
        let duration = started.elapsed();
        self.perf.record_agent_duration(&agent_name, duration).await;

        let (status, error, call_result, transient_exhausted) = match step_outcome {
            StepOutcome::Success(result) => (ExecutionStatus::Completed, None, result, false),
            StepOutcome::Authoritative(result) => {
                let err = result.error.clone();
                let status = if self.registry.tolerates_missing_upstream(&agent_name) {
                    ExecutionStatus::Partial
                } else {
                    ExecutionStatus::Failed
                };
                (status, err, result, false)
            }
            StepOutcome::TransientExhausted(message) => (
                ExecutionStatus::Failed,
                Some(message.clone()),
                AgentCallResult::failed(message),
                true,
            ),
        };

        for message in &call_result.messages {
            self.sink
                .on_message(plan_id, &agent_name, &agent_name, message)
                .await;
        }

        self.emit(
            plan_id,
            WorkflowEvent::new(WorkflowEventType::AgentCompleted, "agent completed")
                .with_agent(agent_name.clone())
                .with_metadata(serde_json::json!({"status": status})),
        )
        .await;

        state.merge_step(
            &agent_name,
            call_result.messages,
            call_result.output,
            ExecutionResult {
                agent: agent_name.clone(),
                status,
                duration_ms: duration.as_millis() as u64,
                error: error.clone(),
            },
        );

        if status == ExecutionStatus::Failed {
            self.approvals.mark_failed(plan_id).await.ok();
            let message = error.unwrap_or_else(|| "agent failed".to_string());
            return Err(if transient_exhausted {
                WorkflowError::TransientExhausted(message)
            } else {
                WorkflowError::Authoritative(message)
            });
        }

        if state.current_step == graph.nodes.len() {
            state.final_result = Some(serde_json::json!(state.collected_data));
        } else if requires_approval_after {
            state.awaiting_user_input = true;
        }

        self.emit(
            plan_id,
            WorkflowEvent::new(WorkflowEventType::ProgressUpdated, "progress updated").with_metadata(
                serde_json::json!({
                    "current_step": state.current_step,
                    "total_steps": graph.nodes.len(),
                }),
            ),
        )
        .await;

        Ok(())
    }

    /// Retries a transient failure (agent-returned or a step timeout) under
    /// exponential backoff until it succeeds, exhausts its retry budget, or
    /// mock-mode substitutes a synthetic success (spec.md §4.9). An
    /// authoritative agent-returned failure never retries.
    async fn call_with_retry(
        &self,
        agent: &Arc<dyn Agent>,
        state: &WorkflowState,
        agent_name: &str,
    ) -> StepOutcome {
        let mut attempt = 0;
        loop {
            let outcome = tokio::time::timeout(self.config.step_timeout, agent.call(state)).await;
            let failed_result = match outcome {
                Ok(result) if result.error.is_none() => return StepOutcome::Success(result),
                Ok(result) if !result.transient => return StepOutcome::Authoritative(result),
                Ok(result) => Some(result),
                Err(_) => None,
            };

            if attempt < self.retry_policy.max_retries {
                tracing::warn!(agent = %agent_name, attempt, "transient agent failure, retrying");
                tokio::time::sleep(self.retry_policy.backoff_for_attempt(attempt)).await;
                attempt += 1;
                continue;
            }

            if self.mock_policy.should_substitute_transient_failure() {
                tracing::warn!(agent = %agent_name, "mock mode substituting transient failure");
                return StepOutcome::Success(AgentCallResult::ok(serde_json::json!({"mocked": true})));
            }

            let reason = failed_result
                .and_then(|r| r.error)
                .unwrap_or_else(|| format!("agent {agent_name} timed out"));
            return StepOutcome::TransientExhausted(format!(
                "agent {agent_name} exhausted {} retries: {reason}",
                self.retry_policy.max_retries
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use wf_types::{AgentMetadata, OrchestratorConfig};

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        async fn call(&self, state: &WorkflowState) -> AgentCallResult {
            AgentCallResult::ok(serde_json::json!({"step": state.current_step}))
                .with_message(format!("step {} done", state.current_step))
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl Agent for FailingAgent {
        async fn call(&self, _state: &WorkflowState) -> AgentCallResult {
            AgentCallResult::failed("crm lookup failed")
        }
    }

    struct AlwaysTransientAgent;

    #[async_trait]
    impl Agent for AlwaysTransientAgent {
        async fn call(&self, _state: &WorkflowState) -> AgentCallResult {
            AgentCallResult::transient_failed("mcp connection refused")
        }
    }

    fn registry() -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(EchoAgent), AgentMetadata::new("planner", "plans"));
        registry.register(Arc::new(EchoAgent), AgentMetadata::new("analysis", "analyzes"));
        registry.register(Arc::new(FailingAgent), AgentMetadata::new("salesforce", "crm"));
        registry.register(Arc::new(AlwaysTransientAgent), AgentMetadata::new("invoice", "ap"));
        Arc::new(registry)
    }

    async fn executor_with_plan_approved(
        registry: Arc<AgentRegistry>,
        plan_id: &str,
        agents: &[&str],
    ) -> LinearExecutor {
        executor_with(
            registry,
            plan_id,
            agents,
            MockModePolicy::from_config(&OrchestratorConfig::default()),
        )
        .await
    }

    async fn executor_with(
        registry: Arc<AgentRegistry>,
        plan_id: &str,
        agents: &[&str],
        mock_policy: MockModePolicy,
    ) -> LinearExecutor {
        let approvals = ApprovalStateManager::new();
        approvals.mark_planned(plan_id).await.unwrap();
        let sequence: Vec<String> = agents.iter().map(|a| a.to_string()).collect();
        approvals
            .submit_plan_approval(plan_id, true, sequence.clone(), sequence, None)
            .await
            .unwrap();

        LinearExecutor::new(
            registry,
            approvals,
            Arc::new(WorkflowContextService::new()),
            Arc::new(PerformanceMonitor::default()),
            Arc::new(crate::sink::NoopSink),
            RetryPolicy {
                max_retries: 1,
                base: Duration::from_millis(1),
                cap: Duration::from_millis(5),
            },
            mock_policy,
            ExecutorConfig {
                step_timeout: Duration::from_secs(5),
                workflow_timeout: Duration::from_secs(30),
            },
        )
    }

    fn graph(agents: &[&str]) -> Graph {
        Graph {
            graph_type: crate::compiler::GraphType::Simple,
            nodes: agents
                .iter()
                .enumerate()
                .map(|(i, name)| crate::compiler::GraphNode {
                    step_index: i,
                    agent_name: name.to_string(),
                    requires_approval_after: false,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn runs_every_step_and_sets_final_result() {
        let exec = executor_with_plan_approved(registry(), "p1", &["planner", "analysis"]).await;
        let state = WorkflowState::new(
            "p1".into(),
            "s1".into(),
            "task".into(),
            vec!["planner".into(), "analysis".into()],
            false,
        );
        let (result, signal) = exec
            .run("p1", &graph(&["planner", "analysis"]), state, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(signal, RunSignal::Completed);
        assert_eq!(result.current_step, 2);
        assert!(result.final_result.is_some());
        assert!(result.messages.len() >= 2);
    }

    #[tokio::test]
    async fn agent_failure_stops_execution_and_marks_failed() {
        let exec = executor_with_plan_approved(registry(), "p1", &["planner", "salesforce"]).await;
        let state = WorkflowState::new(
            "p1".into(),
            "s1".into(),
            "task".into(),
            vec!["planner".into(), "salesforce".into()],
            false,
        );
        let err = exec
            .run("p1", &graph(&["planner", "salesforce"]), state, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Authoritative(_)));
    }

    #[tokio::test]
    async fn transient_failure_exhausts_retries_when_mock_mode_off() {
        let mock_policy = MockModePolicy {
            use_mock_mode: false,
            use_mock_llm: false,
        };
        let exec = executor_with(registry(), "p1", &["planner", "invoice"], mock_policy).await;
        let state = WorkflowState::new(
            "p1".into(),
            "s1".into(),
            "task".into(),
            vec!["planner".into(), "invoice".into()],
            false,
        );
        let err = exec
            .run("p1", &graph(&["planner", "invoice"]), state, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::TransientExhausted(_)));
    }

    #[tokio::test]
    async fn transient_failure_is_substituted_in_mock_mode() {
        let mock_policy = MockModePolicy {
            use_mock_mode: true,
            use_mock_llm: false,
        };
        let exec = executor_with(registry(), "p1", &["planner", "invoice"], mock_policy).await;
        let state = WorkflowState::new(
            "p1".into(),
            "s1".into(),
            "task".into(),
            vec!["planner".into(), "invoice".into()],
            false,
        );
        let (result, signal) = exec
            .run("p1", &graph(&["planner", "invoice"]), state, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(signal, RunSignal::Completed);
        assert!(result.collected_data.contains_key("invoice"));
    }

    #[tokio::test]
    async fn step_wise_hitl_checkpoint_suspends_and_resumes() {
        let exec = executor_with_plan_approved(registry(), "p1", &["planner", "analysis"]).await;
        let mut checkpointed_graph = graph(&["planner", "analysis"]);
        checkpointed_graph.nodes[0].requires_approval_after = true;
        let state = WorkflowState::new(
            "p1".into(),
            "s1".into(),
            "task".into(),
            vec!["planner".into(), "analysis".into()],
            false,
        );

        let (suspended_state, signal) = exec
            .run("p1", &checkpointed_graph, state, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(signal, RunSignal::Suspended);
        assert!(suspended_state.awaiting_user_input);
        assert_eq!(suspended_state.current_step, 1);
        assert!(exec.approvals.is_locked("p1").await);

        let (resumed_state, signal) = exec
            .resume("p1", &checkpointed_graph, suspended_state, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(signal, RunSignal::Completed);
        assert!(!resumed_state.awaiting_user_input);
        assert_eq!(resumed_state.current_step, 2);
        assert!(!exec.approvals.is_locked("p1").await);
    }

    #[tokio::test]
    async fn cancellation_is_observed_between_steps() {
        let exec = executor_with_plan_approved(registry(), "p1", &["planner", "analysis"]).await;
        let state = WorkflowState::new(
            "p1".into(),
            "s1".into(),
            "task".into(),
            vec!["planner".into(), "analysis".into()],
            false,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = exec
            .run("p1", &graph(&["planner", "analysis"]), state, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled(_)));
    }
}
