pub mod approval;
pub mod config;
pub mod event;
pub mod message;
pub mod plan;
pub mod sequence;
pub mod workflow;

pub use approval::{ApprovalRecord, PlanApproval, ResultApproval, WorkflowStateEnum};
pub use config::{interpret_clarification, OrchestratorConfig};
pub use event::{ServerEventData, ServerEventEnvelope, WorkflowEvent, WorkflowEventType};
pub use message::AgentMessage;
pub use plan::{Plan, PlanStatus, PlanStep, PlanStepStatus};
pub use sequence::{AgentMetadata, AgentSequence};
pub use workflow::{ExecutionResult, ExecutionStatus, WorkflowState};

/// Generates a fresh id for a plan, session, message, or event.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
