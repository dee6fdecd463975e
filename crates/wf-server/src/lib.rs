//! The public API surface (C12), durable store (C8), and WebSocket fan-out
//! (C7) that sit in front of `wf-core`'s orchestration engine.

pub mod fanout;
pub mod http;
pub mod sink;
pub mod store;
pub mod ws;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use wf_core::{
    AgentRegistry, ApprovalStateManager, ExecutorConfig, Graph, GraphCompiler, LinearExecutor,
    MockModePolicy, PerformanceMonitor, Planner, RetryPolicy, WorkflowContextService,
};
use wf_types::{AgentSequence, OrchestratorConfig, WorkflowState};

use crate::fanout::FanoutHub;
use crate::sink::DurableFanoutSink;
use crate::store::WorkflowStore;

/// In-memory runtime state for one workflow instance — the compiled graph,
/// the planner's rationale, and the latest `WorkflowState` snapshot. The
/// durable store mirrors this; this map is the fast path the executor and
/// the request handlers actually operate on.
pub struct WorkflowRuntime {
    pub sequence: AgentSequence,
    pub graph: Graph,
    pub state: WorkflowState,
}

/// Everything an axum handler needs, grouped the way the teacher's
/// `AppState` groups its subsystems — one `Arc`/lock-wrapped field per
/// shared structure, cheap to `Clone`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<OrchestratorConfig>,
    pub registry: Arc<AgentRegistry>,
    pub planner: Arc<Planner>,
    pub compiler: Arc<Mutex<GraphCompiler>>,
    pub approvals: Arc<ApprovalStateManager>,
    pub context: Arc<WorkflowContextService>,
    pub perf: Arc<PerformanceMonitor>,
    pub store: Arc<WorkflowStore>,
    pub fanout: Arc<FanoutHub>,
    pub executor: Arc<LinearExecutor>,
    pub workflows: Arc<RwLock<HashMap<String, WorkflowRuntime>>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<AgentRegistry>,
        planner_backend: Box<dyn wf_core::PlannerBackend>,
        mock_policy: MockModePolicy,
        store: WorkflowStore,
    ) -> Self {
        let config = Arc::new(config);
        let approvals = ApprovalStateManager::new();
        let context = Arc::new(WorkflowContextService::new());
        let perf = Arc::new(PerformanceMonitor::default());
        let retry_policy = RetryPolicy::default();
        let store = Arc::new(store);
        let fanout = Arc::new(FanoutHub::new(
            config.ws_backlog_per_plan as usize,
            config.ws_slow_subscriber_high_water as usize,
        ));
        let sink = Arc::new(DurableFanoutSink::new(store.clone(), fanout.clone()));

        let executor = Arc::new(LinearExecutor::new(
            registry.clone(),
            approvals.clone(),
            context.clone(),
            perf.clone(),
            sink,
            retry_policy,
            mock_policy,
            ExecutorConfig {
                step_timeout: std::time::Duration::from_secs(config.agent_timeout_seconds),
                workflow_timeout: std::time::Duration::from_secs(config.workflow_timeout_seconds),
            },
        ));

        Self {
            planner: Arc::new(Planner::new(planner_backend, config.max_workflow_steps as usize)),
            compiler: Arc::new(Mutex::new(GraphCompiler::new(
                config.graph_cache_max_entries as usize,
                perf.clone(),
            ))),
            fanout,
            store,
            registry,
            approvals,
            context,
            perf,
            executor,
            config,
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}
