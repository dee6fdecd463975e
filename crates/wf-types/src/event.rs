use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// C9: append-only context-log event type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventType {
    WorkflowCreated,
    StatusChanged,
    PlanApproved,
    PlanRejected,
    AgentStarted,
    AgentCompleted,
    ProgressUpdated,
    FinalApproved,
    RestartRequested,
    ErrorOccurred,
}

/// C9 context-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: WorkflowEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl WorkflowEvent {
    pub fn new(event_type: WorkflowEventType, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            agent_name: None,
            message: message.into(),
            metadata: None,
        }
    }

    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// C7 wire payload kinds, per spec.md §6.2. Carried as a tagged enum so the
/// fan-out can construct one typed value and serialize it straight onto the
/// socket inside a `ServerEventEnvelope`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEventData {
    PlanCreated {
        plan_id: String,
        session_id: String,
        description: String,
    },
    PlanApprovalRequest {
        plan_id: String,
        agents: Vec<String>,
        complexity_score: f64,
    },
    AgentStarted {
        agent_name: String,
    },
    AgentCompleted {
        agent_name: String,
        status: String,
    },
    AgentMessage {
        agent_name: String,
        agent_type: String,
        content: String,
        status: String,
    },
    AgentStreamStart {
        agent_name: String,
    },
    AgentMessageStreaming {
        agent_name: String,
        delta: String,
    },
    AgentStreamEnd {
        agent_name: String,
    },
    ProgressUpdate {
        current_step: usize,
        total_steps: usize,
        current_agent: Option<String>,
    },
    StepProgress {
        current_step: usize,
        total_steps: usize,
        current_agent: Option<String>,
        step_id: String,
    },
    FinalResultMessage {
        content: serde_json::Value,
        status: String,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_name: Option<String>,
        error: String,
        recoverable: bool,
    },
    Pong,
}

/// The envelope actually written to the socket: `{type, data, timestamp}`.
/// `type` is duplicated from `data`'s internal tag for client convenience,
/// matching the lineage's `StreamEventEnvelopeV2` style of a stable outer
/// shape around a variant payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: ServerEventData,
    pub timestamp: DateTime<Utc>,
}

impl ServerEventEnvelope {
    pub fn new(data: ServerEventData) -> Self {
        let kind = match &data {
            ServerEventData::PlanCreated { .. } => "plan_created",
            ServerEventData::PlanApprovalRequest { .. } => "plan_approval_request",
            ServerEventData::AgentStarted { .. } => "agent_started",
            ServerEventData::AgentCompleted { .. } => "agent_completed",
            ServerEventData::AgentMessage { .. } => "agent_message",
            ServerEventData::AgentStreamStart { .. } => "agent_stream_start",
            ServerEventData::AgentMessageStreaming { .. } => "agent_message_streaming",
            ServerEventData::AgentStreamEnd { .. } => "agent_stream_end",
            ServerEventData::ProgressUpdate { .. } => "progress_update",
            ServerEventData::StepProgress { .. } => "step_progress",
            ServerEventData::FinalResultMessage { .. } => "final_result_message",
            ServerEventData::Error { .. } => "error",
            ServerEventData::Pong => "pong",
        }
        .to_string();
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_kind_matches_payload_tag() {
        let env = ServerEventEnvelope::new(ServerEventData::AgentMessage {
            agent_name: "invoice".into(),
            agent_type: "analysis".into(),
            content: "ok".into(),
            status: "completed".into(),
        });
        assert_eq!(env.kind, "agent_message");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "agent_message");
    }
}
