use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wf_types::{AgentMessage, Plan, WorkflowEvent, WorkflowState};

/// C8 durable half: directory-per-plan JSONL store with atomic
/// temp-then-rename writes, closely following the teacher's
/// `OrchestratorStore` (`save_run`/`load_run`,
/// `append_run_event`/`latest_run_event_seq`, `atomic_write`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("plan not found: {0}")]
    NotFound(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub seq: u64,
    pub event: WorkflowEvent,
}

pub struct WorkflowStore {
    base_dir: PathBuf,
    /// Per-`plan_id` monotonic `sequence_number` counter for `messages.jsonl`
    /// (spec.md §4.6). Lazily seeded from the file's current max on first
    /// touch so a restarted process still hands out strictly-increasing
    /// numbers, then served from memory after that.
    message_seq: Mutex<HashMap<String, u64>>,
}

impl WorkflowStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)
            .map_err(|e| StoreError::Io(format!("failed to create store directory: {e}")))?;
        Ok(Self {
            base_dir,
            message_seq: Mutex::new(HashMap::new()),
        })
    }

    fn plan_dir(&self, plan_id: &str) -> PathBuf {
        self.base_dir.join(plan_id)
    }

    fn ensure_plan_dir(&self, plan_id: &str) -> Result<PathBuf> {
        let dir = self.plan_dir(plan_id);
        fs::create_dir_all(&dir)
            .map_err(|e| StoreError::Io(format!("failed to create plan directory: {e}")))?;
        Ok(dir)
    }

    pub fn save_plan(&self, plan: &Plan) -> Result<()> {
        let dir = self.ensure_plan_dir(&plan.id)?;
        let content = serde_json::to_string_pretty(plan)
            .map_err(|e| StoreError::Serialization(format!("plan: {e}")))?;
        atomic_write(&dir.join("plan.json"), &content)
    }

    pub fn load_plan(&self, plan_id: &str) -> Result<Plan> {
        let path = self.plan_dir(plan_id).join("plan.json");
        let content = fs::read_to_string(&path)
            .map_err(|_| StoreError::NotFound(plan_id.to_string()))?;
        serde_json::from_str(&content).map_err(|e| StoreError::Parse(format!("plan: {e}")))
    }

    pub fn save_state(&self, plan_id: &str, state: &WorkflowState) -> Result<()> {
        let dir = self.ensure_plan_dir(plan_id)?;
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StoreError::Serialization(format!("state: {e}")))?;
        atomic_write(&dir.join("state.json"), &content)
    }

    pub fn load_state(&self, plan_id: &str) -> Result<WorkflowState> {
        let path = self.plan_dir(plan_id).join("state.json");
        let content = fs::read_to_string(&path)
            .map_err(|_| StoreError::NotFound(plan_id.to_string()))?;
        serde_json::from_str(&content).map_err(|e| StoreError::Parse(format!("state: {e}")))
    }

    /// Appends to the sequenced JSONL event log, assigning the next
    /// monotonic `seq` for this plan.
    pub fn append_event(&self, plan_id: &str, event: &WorkflowEvent) -> Result<u64> {
        let dir = self.ensure_plan_dir(plan_id)?;
        let seq = self.latest_event_seq(plan_id)? + 1;
        let record = StoredEvent {
            seq,
            event: event.clone(),
        };

        let path = dir.join("events.jsonl");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::Io(format!("failed to open events log: {e}")))?;
        let line = serde_json::to_string(&record)
            .map_err(|e| StoreError::Serialization(format!("event: {e}")))?;
        writeln!(file, "{line}").map_err(|e| StoreError::Io(format!("failed to write event: {e}")))?;
        Ok(seq)
    }

    pub fn latest_event_seq(&self, plan_id: &str) -> Result<u64> {
        let path = self.plan_dir(plan_id).join("events.jsonl");
        if !path.exists() {
            return Ok(0);
        }
        let file = File::open(&path).map_err(|e| StoreError::Io(format!("{e}")))?;
        let reader = BufReader::new(file);
        let mut latest = 0u64;
        for line in reader.lines() {
            let line = line.map_err(|e| StoreError::Io(format!("{e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<StoredEvent>(&line) {
                latest = latest.max(record.seq);
            }
        }
        Ok(latest)
    }

    pub fn load_events(
        &self,
        plan_id: &str,
        since_seq: Option<u64>,
        tail: Option<usize>,
    ) -> Result<Vec<StoredEvent>> {
        let path = self.plan_dir(plan_id).join("events.jsonl");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path).map_err(|e| StoreError::Io(format!("{e}")))?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| StoreError::Io(format!("{e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<StoredEvent>(&line) {
                if let Some(min_seq) = since_seq {
                    if record.seq <= min_seq {
                        continue;
                    }
                }
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.seq);
        if let Some(tail_count) = tail {
            if records.len() > tail_count {
                records = records.split_off(records.len() - tail_count);
            }
        }
        Ok(records)
    }

    /// Appends a well-formed `AgentMessage` to the per-plan `messages.jsonl`,
    /// assigning the next strictly-increasing `sequence_number` for
    /// `plan_id` (spec.md §4.6). Rejects malformed messages before touching
    /// the sequence counter or the file.
    pub fn append_message(
        &self,
        plan_id: &str,
        agent_name: &str,
        agent_type: &str,
        content: &str,
    ) -> Result<AgentMessage> {
        let draft = AgentMessage {
            plan_id: plan_id.to_string(),
            agent_name: agent_name.to_string(),
            agent_type: agent_type.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            sequence_number: 0,
        };
        if !draft.is_well_formed() {
            return Err(StoreError::InvalidMessage(format!(
                "message for plan {plan_id} failed schema validation"
            )));
        }

        let dir = self.ensure_plan_dir(plan_id)?;
        let message = AgentMessage {
            sequence_number: self.next_message_seq(plan_id)?,
            ..draft
        };

        let path = dir.join("messages.jsonl");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::Io(format!("failed to open message log: {e}")))?;
        let line = serde_json::to_string(&message)
            .map_err(|e| StoreError::Serialization(format!("message: {e}")))?;
        writeln!(file, "{line}").map_err(|e| StoreError::Io(format!("failed to write message: {e}")))?;
        Ok(message)
    }

    fn next_message_seq(&self, plan_id: &str) -> Result<u64> {
        let mut counters = self.message_seq.lock().expect("message_seq mutex poisoned");
        if let Some(seq) = counters.get_mut(plan_id) {
            *seq += 1;
            return Ok(*seq);
        }
        let next = self.latest_message_seq(plan_id)? + 1;
        counters.insert(plan_id.to_string(), next);
        Ok(next)
    }

    fn latest_message_seq(&self, plan_id: &str) -> Result<u64> {
        let path = self.plan_dir(plan_id).join("messages.jsonl");
        if !path.exists() {
            return Ok(0);
        }
        let file = File::open(&path).map_err(|e| StoreError::Io(format!("{e}")))?;
        let reader = BufReader::new(file);
        let mut latest = 0u64;
        for line in reader.lines() {
            let line = line.map_err(|e| StoreError::Io(format!("{e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(message) = serde_json::from_str::<AgentMessage>(&line) {
                latest = latest.max(message.sequence_number);
            }
        }
        Ok(latest)
    }

    pub fn load_messages(&self, plan_id: &str) -> Result<Vec<AgentMessage>> {
        let path = self.plan_dir(plan_id).join("messages.jsonl");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path).map_err(|e| StoreError::Io(format!("{e}")))?;
        let reader = BufReader::new(file);
        let mut messages = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| StoreError::Io(format!("{e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(message) = serde_json::from_str::<AgentMessage>(&line) {
                messages.push(message);
            }
        }
        messages.sort_by_key(|m| m.sequence_number);
        Ok(messages)
    }

    pub fn plan_exists(&self, plan_id: &str) -> bool {
        self.plan_dir(plan_id).join("plan.json").exists()
    }

    pub fn list_plans(&self) -> Result<Vec<String>> {
        let mut plans = Vec::new();
        let entries = fs::read_dir(&self.base_dir)
            .map_err(|e| StoreError::Io(format!("failed to read store directory: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io(format!("{e}")))?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    plans.push(name.to_string());
                }
            }
        }
        Ok(plans)
    }

    pub fn delete_plan(&self, plan_id: &str) -> Result<()> {
        let dir = self.plan_dir(plan_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .map_err(|e| StoreError::Io(format!("failed to delete plan directory: {e}")))?;
        }
        Ok(())
    }
}

fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)
        .map_err(|e| StoreError::Io(format!("failed to write temp file: {e}")))?;
    fs::rename(&temp_path, path)
        .map_err(|e| StoreError::Io(format!("failed to rename temp file: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_types::{PlanStatus, WorkflowEventType};

    fn temp_store() -> (WorkflowStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkflowStore::new(dir.path()).unwrap();
        (store, dir)
    }

    fn plan() -> Plan {
        Plan::new("p1".into(), "s1".into(), "task".into())
    }

    #[test]
    fn round_trips_plan() {
        let (store, _dir) = temp_store();
        let plan = plan();
        store.save_plan(&plan).unwrap();
        let loaded = store.load_plan("p1").unwrap();
        assert_eq!(loaded.id, "p1");
        assert_eq!(loaded.status, PlanStatus::Pending);
    }

    #[test]
    fn missing_plan_is_not_found() {
        let (store, _dir) = temp_store();
        assert!(matches!(store.load_plan("ghost"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn events_are_sequenced_and_filterable() {
        let (store, _dir) = temp_store();
        for _ in 0..5 {
            store
                .append_event("p1", &WorkflowEvent::new(WorkflowEventType::AgentStarted, "tick"))
                .unwrap();
        }
        assert_eq!(store.latest_event_seq("p1").unwrap(), 5);

        let tail = store.load_events("p1", None, Some(2)).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].seq, 5);

        let since = store.load_events("p1", Some(3), None).unwrap();
        assert_eq!(since.len(), 2);
    }

    #[test]
    fn delete_plan_removes_directory() {
        let (store, _dir) = temp_store();
        store.save_plan(&plan()).unwrap();
        assert!(store.plan_exists("p1"));
        store.delete_plan("p1").unwrap();
        assert!(!store.plan_exists("p1"));
    }

    #[test]
    fn messages_are_sequenced_monotonically_per_plan() {
        let (store, _dir) = temp_store();
        let first = store.append_message("p1", "invoice", "invoice", "checking status").unwrap();
        let second = store.append_message("p1", "invoice", "invoice", "found 2 overdue").unwrap();
        let other_plan = store.append_message("p2", "planner", "planner", "planning").unwrap();

        assert_eq!(first.sequence_number, 1);
        assert_eq!(second.sequence_number, 2);
        assert_eq!(other_plan.sequence_number, 1);

        let loaded = store.load_messages("p1").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].sequence_number, 1);
        assert_eq!(loaded[1].sequence_number, 2);
    }

    #[test]
    fn message_sequence_resumes_across_store_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = WorkflowStore::new(dir.path()).unwrap();
            store.append_message("p1", "invoice", "invoice", "first").unwrap();
        }
        let reopened = WorkflowStore::new(dir.path()).unwrap();
        let next = reopened.append_message("p1", "invoice", "invoice", "second").unwrap();
        assert_eq!(next.sequence_number, 2);
    }

    #[test]
    fn malformed_message_is_rejected_before_touching_the_sequence() {
        let (store, _dir) = temp_store();
        let err = store.append_message("p1", "", "invoice", "content").unwrap_err();
        assert!(matches!(err, StoreError::InvalidMessage(_)));
        assert!(store.load_messages("p1").unwrap().is_empty());
    }
}
