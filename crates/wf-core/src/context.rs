use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use wf_types::WorkflowEvent;

/// C9: an append-only in-memory event log, one stream per `plan_id`. This is
/// the read side agents and the API query for "what has happened so far";
/// durable persistence and WebSocket fan-out live in `wf-server`.
/// Grounded on the Python `workflow_context_service.py` and
/// `cleanup_utility.py`'s age-based sweep.
pub struct WorkflowContextService {
    streams: RwLock<HashMap<String, Vec<WorkflowEvent>>>,
}

impl WorkflowContextService {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_event(&self, plan_id: &str, event: WorkflowEvent) {
        let mut streams = self.streams.write().await;
        streams.entry(plan_id.to_string()).or_default().push(event);
    }

    pub async fn get_recent_events(&self, plan_id: &str, limit: usize) -> Vec<WorkflowEvent> {
        let streams = self.streams.read().await;
        match streams.get(plan_id) {
            Some(events) => events.iter().rev().take(limit).rev().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn event_count(&self, plan_id: &str) -> usize {
        self.streams.read().await.get(plan_id).map(Vec::len).unwrap_or(0)
    }

    /// A short human-readable digest: event count and most recent event type.
    pub async fn get_summary(&self, plan_id: &str) -> Option<String> {
        let streams = self.streams.read().await;
        let events = streams.get(plan_id)?;
        let last = events.last()?;
        Some(format!(
            "{} events, last={:?} at {}",
            events.len(),
            last.event_type,
            last.timestamp
        ))
    }

    /// Drops any stream whose most recent event predates `cutoff`
    /// (Python `cleanup_completed_workflows` age-based sweep).
    pub async fn cleanup(&self, cutoff: DateTime<Utc>) -> usize {
        let mut streams = self.streams.write().await;
        let before = streams.len();
        streams.retain(|_, events| match events.last() {
            Some(last) => last.timestamp >= cutoff,
            None => false,
        });
        before - streams.len()
    }
}

impl Default for WorkflowContextService {
    fn default() -> Self {
        Self::new()
    }
}
