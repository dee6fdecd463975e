use serde::{Deserialize, Serialize};

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().to_ascii_lowercase().parse::<bool>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// The environment-variable surface from spec.md §6.4, read once at process
/// start (spec.md §9: "all switches are read once at startup into the
/// policy").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub use_mock_mode: bool,
    pub use_mock_llm: bool,
    pub hitl_enabled: bool,
    pub graph_cache_max_entries: u64,
    pub agent_timeout_seconds: u64,
    pub workflow_timeout_seconds: u64,
    pub max_workflow_steps: u64,
    pub context_gc_hours: u64,
    pub ws_backlog_per_plan: u64,
    pub ws_slow_subscriber_high_water: u64,
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        Self {
            use_mock_mode: env_bool("USE_MOCK_MODE", false),
            use_mock_llm: env_bool("USE_MOCK_LLM", false),
            hitl_enabled: env_bool("HITL_ENABLED", true),
            graph_cache_max_entries: env_u64("GRAPH_CACHE_MAX_ENTRIES", 128),
            agent_timeout_seconds: env_u64("AGENT_TIMEOUT_SECONDS", 120),
            workflow_timeout_seconds: env_u64("WORKFLOW_TIMEOUT_SECONDS", 1800),
            max_workflow_steps: env_u64("MAX_WORKFLOW_STEPS", 10),
            context_gc_hours: env_u64("CONTEXT_GC_HOURS", 24),
            ws_backlog_per_plan: env_u64("WS_BACKLOG_PER_PLAN", 200),
            ws_slow_subscriber_high_water: env_u64("WS_SLOW_SUBSCRIBER_HIGH_WATER", 1000),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            use_mock_mode: false,
            use_mock_llm: false,
            hitl_enabled: true,
            graph_cache_max_entries: 128,
            agent_timeout_seconds: 120,
            workflow_timeout_seconds: 1800,
            max_workflow_steps: 10,
            context_gc_hours: 24,
            ws_backlog_per_plan: 200,
            ws_slow_subscriber_high_water: 1000,
        }
    }
}

/// Free-text clarification interpretation, per spec.md §6.4.
pub fn interpret_clarification(answer: &str) -> bool {
    const APPROVE_WORDS: [&str; 8] = [
        "ok", "yes", "approve", "approved", "good", "correct", "fine", "proceed",
    ];
    const REJECT_WORDS: [&str; 7] = [
        "no",
        "reject",
        "wrong",
        "incorrect",
        "restart",
        "start over",
        "new task",
    ];
    let lowered = answer.trim().to_ascii_lowercase();
    let has_reject = REJECT_WORDS.iter().any(|w| lowered.contains(w));
    if has_reject {
        return false;
    }
    APPROVE_WORDS.iter().any(|w| lowered.contains(w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.graph_cache_max_entries, 128);
        assert_eq!(cfg.agent_timeout_seconds, 120);
        assert_eq!(cfg.workflow_timeout_seconds, 1800);
        assert_eq!(cfg.max_workflow_steps, 10);
    }

    #[test]
    fn clarification_approves_on_approve_keyword() {
        assert!(interpret_clarification("Yes, looks Good"));
    }

    #[test]
    fn clarification_rejects_when_reject_keyword_present_even_with_approve_word() {
        assert!(!interpret_clarification("no that's wrong, start over"));
    }

    #[test]
    fn clarification_defaults_to_restart_when_ambiguous() {
        assert!(!interpret_clarification("maybe later"));
    }
}
