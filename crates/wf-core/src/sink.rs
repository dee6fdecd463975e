use async_trait::async_trait;
use wf_types::WorkflowEvent;

/// Destination for per-step execution telemetry (spec.md §4.3 "Persist any
/// new messages through C8; update progress in C9"). `wf-server` implements
/// this to dual-write into the durable store and the WebSocket fan-out; the
/// executor never depends on either directly, only on this trait, so the
/// core stays free of transport types.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn on_event(&self, plan_id: &str, event: &WorkflowEvent);

    async fn on_message(&self, plan_id: &str, agent_name: &str, agent_type: &str, content: &str);
}

/// Used where no sink is wired (unit tests, the `Run` CLI subcommand).
pub struct NoopSink;

#[async_trait]
impl ExecutionSink for NoopSink {
    async fn on_event(&self, _plan_id: &str, _event: &WorkflowEvent) {}

    async fn on_message(&self, _plan_id: &str, _agent_name: &str, _agent_type: &str, _content: &str) {}
}
