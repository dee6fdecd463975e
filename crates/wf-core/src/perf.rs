use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::RwLock;

const DEFAULT_RING_CAPACITY: usize = 256;

fn push_bounded(buf: &mut VecDeque<Duration>, value: Duration, capacity: usize) {
    if buf.len() >= capacity {
        buf.pop_front();
    }
    buf.push_back(value);
}

fn average(buf: &VecDeque<Duration>) -> Duration {
    if buf.is_empty() {
        return Duration::ZERO;
    }
    let total: Duration = buf.iter().sum();
    total / buf.len() as u32
}

/// C10: bounded in-memory performance counters. Grounded on the Python
/// `performance_monitor.py`; the ring-buffer-of-durations shape was
/// cross-checked against the teacher's `Budget` usage-percentage style.
pub struct PerformanceMonitor {
    ring_capacity: usize,
    agent_durations: RwLock<HashMap<String, VecDeque<Duration>>>,
    workflow_durations: RwLock<VecDeque<Duration>>,
    graph_compile_durations: RwLock<VecDeque<Duration>>,
    cache_hits: RwLock<u64>,
    cache_misses: RwLock<u64>,
}

impl PerformanceMonitor {
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            ring_capacity: ring_capacity.max(1),
            agent_durations: RwLock::new(HashMap::new()),
            workflow_durations: RwLock::new(VecDeque::new()),
            graph_compile_durations: RwLock::new(VecDeque::new()),
            cache_hits: RwLock::new(0),
            cache_misses: RwLock::new(0),
        }
    }

    pub async fn record_agent_duration(&self, agent_name: &str, duration: Duration) {
        let mut durations = self.agent_durations.write().await;
        let buf = durations.entry(agent_name.to_string()).or_default();
        push_bounded(buf, duration, self.ring_capacity);
    }

    pub async fn record_workflow_duration(&self, duration: Duration) {
        let mut durations = self.workflow_durations.write().await;
        push_bounded(&mut durations, duration, self.ring_capacity);
    }

    pub async fn record_graph_compile(&self, duration: Duration) {
        let mut durations = self.graph_compile_durations.write().await;
        push_bounded(&mut durations, duration, self.ring_capacity);
    }

    pub async fn record_cache_hit(&self) {
        *self.cache_hits.write().await += 1;
    }

    pub async fn record_cache_miss(&self) {
        *self.cache_misses.write().await += 1;
    }

    pub async fn average_agent_duration(&self, agent_name: &str) -> Duration {
        let durations = self.agent_durations.read().await;
        durations.get(agent_name).map(average).unwrap_or(Duration::ZERO)
    }

    pub async fn average_workflow_duration(&self) -> Duration {
        average(&*self.workflow_durations.read().await)
    }

    pub async fn cache_hit_ratio(&self) -> f64 {
        let hits = *self.cache_hits.read().await as f64;
        let misses = *self.cache_misses.read().await as f64;
        if hits + misses == 0.0 {
            return 0.0;
        }
        hits / (hits + misses)
    }

    /// A one-line digest suitable for a periodic `tracing::info!` summary.
    pub async fn summary_line(&self) -> String {
        format!(
            "workflows_tracked={} avg_workflow_ms={} compile_samples={} cache_hit_ratio={:.2}",
            self.workflow_durations.read().await.len(),
            self.average_workflow_duration().await.as_millis(),
            self.graph_compile_durations.read().await.len(),
            self.cache_hit_ratio().await,
        )
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}
