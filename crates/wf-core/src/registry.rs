use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use wf_types::{AgentMetadata, WorkflowState};

/// Outcome of a single agent invocation. The executor merges this into the
/// workflow state; it never inspects the agent's internals (spec.md §9
/// "Dynamic dispatch").
#[derive(Debug, Clone)]
pub struct AgentCallResult {
    pub messages: Vec<String>,
    pub output: serde_json::Value,
    pub error: Option<String>,
    /// True when `error` represents a transient upstream failure (MCP down,
    /// 5xx, etc.) rather than an authoritative one (spec.md §4.9). Agent
    /// bodies are opaque to the core but still classify their own failures,
    /// the same way an MCP client would report a connection error distinctly
    /// from a validation error.
    pub transient: bool,
}

impl AgentCallResult {
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            messages: Vec::new(),
            output,
            error: None,
            transient: false,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    /// An authoritative failure (upstream 4xx, malformed response, schema
    /// mismatch): no retry, per spec.md §4.9.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            output: serde_json::Value::Null,
            error: Some(error.into()),
            transient: false,
        }
    }

    /// A transient failure (MCP connection failure, timeout, 5xx): eligible
    /// for the exponential-backoff retry path.
    pub fn transient_failed(error: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            output: serde_json::Value::Null,
            error: Some(error.into()),
            transient: true,
        }
    }
}

/// C2: an agent is an opaque function `State -> Future<State>` plus a
/// health probe (spec.md §9). Implementers are entirely external to this
/// core — CRM, email, accounts-payable, analysis agents all implement this
/// the same way, and the core never knows which.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn call(&self, state: &WorkflowState) -> AgentCallResult;

    async fn health_check(&self) -> bool {
        true
    }
}

/// Name -> agent function + capability metadata.
#[derive(Clone)]
pub struct AgentRegistry {
    entries: HashMap<String, (Arc<dyn Agent>, AgentMetadata)>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>, metadata: AgentMetadata) {
        self.entries.insert(metadata.name.clone(), (agent, metadata));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.entries.get(name).map(|(agent, _)| agent.clone())
    }

    pub fn metadata(&self, name: &str) -> Option<&AgentMetadata> {
        self.entries.get(name).map(|(_, meta)| meta)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn tolerates_missing_upstream(&self, name: &str) -> bool {
        self.metadata(name)
            .map(|m| m.tolerates_missing_upstream)
            .unwrap_or(false)
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        async fn call(&self, state: &WorkflowState) -> AgentCallResult {
            AgentCallResult::ok(serde_json::json!({"step": state.current_step}))
        }
    }

    #[tokio::test]
    async fn registered_agent_is_retrievable_and_callable() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(EchoAgent), AgentMetadata::new("planner", "plans things"));

        assert!(registry.contains("planner"));
        assert!(!registry.contains("ghost"));

        let agent = registry.get("planner").unwrap();
        let state = WorkflowState::new(
            "p1".into(),
            "s1".into(),
            "task".into(),
            vec!["planner".into()],
            true,
        );
        let result = agent.call(&state).await;
        assert_eq!(result.output["step"], 0);
    }
}
