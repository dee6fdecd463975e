use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::info;
use wf_core::{Agent, AgentCallResult, AgentRegistry, MockModePolicy, Planner, PlannerBackend};
use wf_observability::{init_process_logging, ProcessKind};
use wf_server::store::WorkflowStore;
use wf_server::AppState;
use wf_types::{AgentMetadata, OrchestratorConfig, WorkflowState};

#[derive(Parser, Debug)]
#[command(name = "orchestrator")]
#[command(about = "Headless multi-agent workflow orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP/WebSocket server.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 3000)]
        port: u16,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Plan and run a single task description against an in-process
    /// registry, without starting a server. Useful for smoke-testing a
    /// deployment's agent wiring.
    Run { description: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let state_dir = resolve_state_dir(match &cli.command {
        Command::Serve { state_dir, .. } => state_dir.clone(),
        Command::Run { .. } => None,
    });

    let logs_dir = wf_observability::canonical_logs_dir_from_root(&state_dir);
    let (_guard, log_info) = init_process_logging(ProcessKind::Service, &logs_dir, 14)
        .context("failed to initialize logging")?;
    info!(logs_dir = %log_info.logs_dir, "logging initialized");

    match cli.command {
        Command::Serve {
            hostname,
            port,
            ..
        } => {
            let state = build_state(&state_dir)?;
            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            spawn_gc_task(state.clone());
            spawn_perf_summary_task(state.clone());
            log_startup_paths(&state_dir, &addr);
            let router = wf_server::http::router(state);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, router).await?;
        }
        Command::Run { description } => {
            let state = build_state(&state_dir)?;
            let sequence = state
                .planner
                .plan(&description, &state.registry)
                .await
                .context("planning failed")?;
            info!(agents = ?sequence.agents, complexity = sequence.complexity_score, "planned");

            let graph = {
                let mut compiler = state.compiler.lock().await;
                compiler
                    .compile(&sequence, &state.registry, wf_core::GraphType::Default, false)
                    .await
                    .context("graph compilation failed")?
            };

            let plan_id = wf_types::new_id();
            let workflow_state = WorkflowState::new(
                plan_id.clone(),
                wf_types::new_id(),
                description,
                sequence.agents.clone(),
                false,
            );
            state.approvals.mark_planned(&plan_id).await.ok();
            state
                .approvals
                .submit_plan_approval(
                    &plan_id,
                    true,
                    sequence.agents.clone(),
                    sequence.agents.clone(),
                    None,
                )
                .await
                .ok();

            let cancel = tokio_util::sync::CancellationToken::new();
            let (final_state, _signal) = state
                .executor
                .run(&plan_id, &graph, workflow_state, cancel)
                .await
                .context("execution failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&final_state.final_result)?
            );
        }
    }

    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("ORCHESTRATOR_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".orchestrator")
}

fn log_startup_paths(state_dir: &PathBuf, addr: &SocketAddr) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    info!("starting orchestrator on http://{addr}");
    info!(
        "startup paths: exe={} cwd={} state_dir={}",
        exe.display(),
        cwd.display(),
        state_dir.display()
    );
}

fn build_state(state_dir: &PathBuf) -> anyhow::Result<AppState> {
    let config = OrchestratorConfig::from_env();
    let registry = Arc::new(build_registry());
    let store = WorkflowStore::new(state_dir.join("plans"))
        .map_err(|e| anyhow::anyhow!("failed to open workflow store: {e}"))?;
    let mock_policy = MockModePolicy::from_config(&config);
    let backend: Box<dyn PlannerBackend> = Box::new(NoProviderBackend);

    Ok(AppState::new(config, registry, backend, mock_policy, store))
}

/// No LLM provider adapter ships with this core (out of scope per the
/// spec's boundary: "agent bodies, MCP tool clients, LLM provider
/// integrations"); every call falls straight through to the planner's
/// template/minimum-viable fallback.
struct NoProviderBackend;

#[async_trait]
impl PlannerBackend for NoProviderBackend {
    async fn complete(&self, _prompt: &str) -> Result<String, String> {
        Err("no LLM provider configured".to_string())
    }
}

/// A deterministic, side-effect-free stand-in for a real domain agent
/// (CRM/email/accounts-payable adapters are all out of scope). Produces a
/// fixed-shape acknowledgement so the pipeline is runnable end to end
/// without live integrations.
struct StubAgent {
    name: &'static str,
}

#[async_trait]
impl Agent for StubAgent {
    async fn call(&self, state: &WorkflowState) -> AgentCallResult {
        AgentCallResult::ok(serde_json::json!({
            "agent": self.name,
            "step": state.current_step,
            "task": state.task_description,
        }))
        .with_message(format!("{} completed step {}", self.name, state.current_step))
    }
}

fn build_registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.register(
        Arc::new(StubAgent { name: "planner" }),
        AgentMetadata::new("planner", "produces the initial agent sequence"),
    );
    registry.register(
        Arc::new(StubAgent { name: "invoice" }),
        AgentMetadata::new("invoice", "accounts-payable invoice lookup and verification"),
    );
    registry.register(
        Arc::new(StubAgent { name: "payment" }),
        AgentMetadata::new("payment", "payment status and transaction tracking"),
    );
    registry.register(
        Arc::new(StubAgent { name: "salesforce" }),
        AgentMetadata::new("salesforce", "CRM customer-360 lookup"),
    );
    registry.register(
        Arc::new(StubAgent { name: "gmail" }),
        AgentMetadata::new("gmail", "inbound correspondence lookup"),
    );
    let mut analysis_meta = AgentMetadata::new("analysis", "summarizes collected data into a final result");
    analysis_meta.tolerates_missing_upstream = true;
    registry.register(Arc::new(StubAgent { name: "analysis" }), analysis_meta);
    registry
}

/// Periodic C10 summary line (`/internal/stats`'s numbers, logged so an
/// operator tailing the process log sees the same figures).
fn spawn_perf_summary_task(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            info!("{}", state.perf.summary_line().await);
        }
    });
}

/// Periodic sweep of terminal workflow state and stale context streams
/// (spec.md §9, `CONTEXT_GC_HOURS`).
fn spawn_gc_task(state: AppState) {
    let gc_hours = state.config.context_gc_hours;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let cutoff = chrono::Utc::now() - chrono::Duration::hours(gc_hours as i64);
            let removed = state.approvals.cleanup_completed_workflows(cutoff).await;
            state.context.cleanup(cutoff).await;
            if removed > 0 {
                info!(removed, "garbage-collected completed workflows");
            }
        }
    });
}
