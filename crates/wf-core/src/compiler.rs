use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use wf_types::AgentSequence;

use crate::error::{Result, WorkflowError};
use crate::perf::PerformanceMonitor;
use crate::registry::AgentRegistry;

/// The four graph shapes this spec recognizes (spec.md §4.2). All compile to
/// the same linear node chain; the type only changes which edges/gates are
/// attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphType {
    Simple,
    Default,
    AiDriven,
    HitlEnabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub step_index: usize,
    pub agent_name: String,
    /// A HITL checkpoint follows this node before the next one runs.
    pub requires_approval_after: bool,
}

/// A compiled, linear execution graph (C4). There is exactly one successor
/// per node; branching is out of scope for this spec (spec.md §4.2
/// Non-goals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub graph_type: GraphType,
    pub nodes: Vec<GraphNode>,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn content_hash(sequence: &AgentSequence, graph_type: GraphType, enable_hitl: bool) -> String {
    let key = (
        &sequence.agents,
        graph_type,
        enable_hitl,
    );
    let encoded = serde_json::to_vec(&key).expect("tuple of serializable fields");
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    format!("{:x}", hasher.finalize())
}

fn build_graph(
    sequence: &AgentSequence,
    registry: &AgentRegistry,
    graph_type: GraphType,
    enable_hitl: bool,
) -> Result<Graph> {
    if sequence.agents.is_empty() {
        return Err(WorkflowError::EmptySequence);
    }

    let mut seen = std::collections::HashSet::new();
    for name in &sequence.agents {
        if !registry.contains(name) {
            return Err(WorkflowError::UnknownAgent(name.clone()));
        }
        if !seen.insert(name.as_str()) {
            return Err(WorkflowError::DuplicateAgent(name.clone()));
        }
    }

    let last_index = sequence.agents.len() - 1;
    // `hitl_enabled` interrupts before every agent (spec.md §4.2); the other
    // graph types only gate the terminal node, the pre-result HITL
    // checkpoint `ai_driven` and `default` share.
    let gate_every_node = enable_hitl && graph_type == GraphType::HitlEnabled;
    let nodes = sequence
        .agents
        .iter()
        .enumerate()
        .map(|(step_index, agent_name)| GraphNode {
            step_index,
            agent_name: agent_name.clone(),
            requires_approval_after: gate_every_node || (enable_hitl && step_index == last_index),
        })
        .collect();

    Ok(Graph { graph_type, nodes })
}

struct CacheEntry {
    graph: Graph,
}

/// Process-local content-hash-memoized LRU cache for compiled graphs
/// (spec.md §4.2 "Compilation is memoized by content hash"). No teacher
/// module implements an LRU cache verbatim; this follows the teacher's
/// plain, unwrap-free, Result-returning style.
pub struct GraphCompiler {
    capacity: usize,
    cache: HashMap<String, CacheEntry>,
    lru: VecDeque<String>,
    hits: u64,
    misses: u64,
    perf: Arc<PerformanceMonitor>,
}

impl GraphCompiler {
    pub fn new(capacity: usize, perf: Arc<PerformanceMonitor>) -> Self {
        Self {
            capacity: capacity.max(1),
            cache: HashMap::new(),
            lru: VecDeque::new(),
            hits: 0,
            misses: 0,
            perf,
        }
    }

    /// `compile(sequence, graph_type, enable_hitl) -> Graph` (spec.md §4.2).
    /// Cache operations record hit/miss to C10.
    pub async fn compile(
        &mut self,
        sequence: &AgentSequence,
        registry: &AgentRegistry,
        graph_type: GraphType,
        enable_hitl: bool,
    ) -> Result<Graph> {
        let key = content_hash(sequence, graph_type, enable_hitl);

        if self.cache.contains_key(&key) {
            self.hits += 1;
            self.touch(&key);
            self.perf.record_cache_hit().await;
            return Ok(self.cache.get(&key).expect("just checked").graph.clone());
        }

        self.misses += 1;
        self.perf.record_cache_miss().await;
        let started = Instant::now();
        let graph = build_graph(sequence, registry, graph_type, enable_hitl)?;
        self.perf.record_graph_compile(started.elapsed()).await;
        self.insert(key, graph.clone());
        Ok(graph)
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            let key = self.lru.remove(pos).expect("position just found");
            self.lru.push_back(key);
        }
    }

    fn insert(&mut self, key: String, graph: Graph) {
        if self.cache.len() >= self.capacity && !self.cache.contains_key(&key) {
            if let Some(evicted) = self.lru.pop_front() {
                self.cache.remove(&evicted);
            }
        }
        self.lru.push_back(key.clone());
        self.cache.insert(key, CacheEntry { graph });
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
