use std::sync::Arc;

use async_trait::async_trait;
use wf_core::ExecutionSink;
use wf_types::{ServerEventData, ServerEventEnvelope, WorkflowEvent, WorkflowEventType};

use crate::fanout::FanoutHub;
use crate::store::WorkflowStore;

/// Dual-writes executor telemetry: durable store first, then the WebSocket
/// fan-out (spec.md §4.6 "write order: durable first, then fan-out; if the
/// durable write fails the message is not broadcast").
pub struct DurableFanoutSink {
    store: Arc<WorkflowStore>,
    fanout: Arc<FanoutHub>,
}

impl DurableFanoutSink {
    pub fn new(store: Arc<WorkflowStore>, fanout: Arc<FanoutHub>) -> Self {
        Self { store, fanout }
    }
}

#[async_trait]
impl ExecutionSink for DurableFanoutSink {
    async fn on_event(&self, plan_id: &str, event: &WorkflowEvent) {
        if let Err(e) = self.store.append_event(plan_id, event) {
            tracing::error!(plan_id = %plan_id, error = %e, "failed to persist event, dropping broadcast");
            return;
        }

        let data = match event.event_type {
            WorkflowEventType::AgentStarted => Some(ServerEventData::AgentStarted {
                agent_name: event.agent_name.clone().unwrap_or_default(),
            }),
            WorkflowEventType::AgentCompleted => Some(ServerEventData::AgentCompleted {
                agent_name: event.agent_name.clone().unwrap_or_default(),
                status: event
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("status"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
            }),
            WorkflowEventType::ProgressUpdated => {
                event.metadata.as_ref().map(|m| ServerEventData::ProgressUpdate {
                    current_step: m.get("current_step").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                    total_steps: m.get("total_steps").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                    current_agent: event.agent_name.clone(),
                })
            }
            _ => None,
        };

        if let Some(data) = data {
            self.fanout.publish(plan_id, ServerEventEnvelope::new(data)).await;
        }
    }

    async fn on_message(&self, plan_id: &str, agent_name: &str, agent_type: &str, content: &str) {
        let stored = match self.store.append_message(plan_id, agent_name, agent_type, content) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(plan_id = %plan_id, error = %e, "failed to persist agent message, dropping broadcast");
                return;
            }
        };

        self.fanout
            .publish(
                plan_id,
                ServerEventEnvelope::new(ServerEventData::AgentMessage {
                    agent_name: stored.agent_name,
                    agent_type: stored.agent_type,
                    content: stored.content,
                    status: "completed".to_string(),
                }),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_types::WorkflowEventType;

    fn sink() -> (DurableFanoutSink, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(WorkflowStore::new(dir.path()).unwrap());
        let fanout = Arc::new(FanoutHub::new(16, 16));
        (DurableFanoutSink::new(store, fanout), dir)
    }

    #[tokio::test]
    async fn agent_started_is_persisted_and_broadcast() {
        let (sink, _dir) = sink();
        let (backlog, _rx) = sink.fanout.subscribe("p1").await;
        assert!(backlog.is_empty());

        sink.on_event(
            "p1",
            &WorkflowEvent::new(WorkflowEventType::AgentStarted, "agent started").with_agent("invoice"),
        )
        .await;

        let events = sink.store.load_events("p1", None, None).unwrap();
        assert_eq!(events.len(), 1);

        let (backlog, _rx) = sink.fanout.subscribe("p1").await;
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].kind, "agent_started");
    }

    #[tokio::test]
    async fn message_is_persisted_with_sequence_and_broadcast() {
        let (sink, _dir) = sink();
        sink.on_message("p1", "invoice", "invoice", "checking invoice status").await;
        sink.on_message("p1", "invoice", "invoice", "found 2 overdue invoices").await;

        let messages = sink.store.load_messages("p1").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sequence_number, 1);
        assert_eq!(messages[1].sequence_number, 2);

        let (backlog, _rx) = sink.fanout.subscribe("p1").await;
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].kind, "agent_message");
    }
}
