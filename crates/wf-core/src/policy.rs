use std::time::Duration;

use wf_types::OrchestratorConfig;

/// Process-wide mock-mode policy (spec.md §9 "Mock-mode design"): read once
/// from configuration and injected into the error handler and planner. The
/// core never reads the environment directly.
#[derive(Debug, Clone)]
pub struct MockModePolicy {
    pub use_mock_mode: bool,
    pub use_mock_llm: bool,
}

impl MockModePolicy {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            use_mock_mode: config.use_mock_mode,
            use_mock_llm: config.use_mock_llm,
        }
    }

    /// When mock mode is off, no synthetic fallback is ever introduced
    /// (spec.md §4.9, §7).
    pub fn should_substitute_transient_failure(&self) -> bool {
        self.use_mock_mode
    }

    pub fn should_substitute_llm_failure(&self) -> bool {
        self.use_mock_llm
    }
}

/// Retry policy for Transient errors (spec.md §4.9): exponential backoff,
/// bounded retries (default 3, base 1s, cap 30s), then escalate.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the `attempt`-th retry (0-based), capped.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << attempt.min(20));
        let capped = exp.min(self.cap.as_millis());
        Duration::from_millis(capped as u64)
    }
}
