use std::collections::HashMap;

use async_trait::async_trait;
use wf_types::AgentSequence;

use crate::error::{Result, WorkflowError};
use crate::registry::AgentRegistry;

/// Abstract text-completion interface the planner calls (spec.md §1: "the
/// planner calls an abstract text-completion interface"). Concrete LLM
/// provider adapters live outside this core; tests inject a deterministic
/// stub implementing this trait instead.
#[async_trait]
pub trait PlannerBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, String>;
}

/// A template fallback entry: if any keyword matches the (lower-cased) task
/// description, emit the associated canned sequence.
struct Template {
    keywords: &'static [&'static str],
    agents: &'static [&'static str],
    rationale: &'static str,
}

const TEMPLATES: &[Template] = &[
    Template {
        keywords: &["invoice", "bill"],
        agents: &["planner", "invoice", "analysis"],
        rationale: "invoice verification template",
    },
    Template {
        keywords: &["payment", "transaction", "pay "],
        agents: &["planner", "payment", "analysis"],
        rationale: "payment tracking template",
    },
    Template {
        keywords: &["customer", "crm", "salesforce", "client"],
        agents: &["planner", "salesforce", "analysis"],
        rationale: "customer 360 template",
    },
];

fn template_fallback(task_description: &str) -> AgentSequence {
    let lowered = task_description.to_ascii_lowercase();
    for template in TEMPLATES {
        if template.keywords.iter().any(|kw| lowered.contains(kw)) {
            let agents: Vec<String> = template.agents.iter().map(|a| a.to_string()).collect();
            let mut reasoning = HashMap::new();
            for agent in &agents {
                reasoning.insert(agent.clone(), template.rationale.to_string());
            }
            return AgentSequence {
                agents,
                reasoning,
                complexity_score: 0.3,
                estimated_duration_s: 60,
            };
        }
    }
    AgentSequence::minimum_viable()
}

/// Drops unknown agent names, deduplicates preserving first occurrence,
/// clamps length, and requires at least one non-planner agent
/// (spec.md §4.1 "Validation & sanitization").
pub fn sanitize_sequence(
    candidate: &AgentSequence,
    registry: &AgentRegistry,
    max_len: usize,
) -> AgentSequence {
    let mut seen = std::collections::HashSet::new();
    let mut agents = Vec::new();
    for name in &candidate.agents {
        if !registry.contains(name) {
            tracing::warn!(agent = %name, "planner dropped unknown agent during sanitization");
            continue;
        }
        if !seen.insert(name.clone()) {
            continue;
        }
        agents.push(name.clone());
        if agents.len() >= max_len {
            break;
        }
    }

    let has_non_planner = agents.iter().any(|a| a != "planner");
    if !has_non_planner {
        agents.clear();
    }

    let reasoning = candidate
        .reasoning
        .iter()
        .filter(|(name, _)| agents.contains(name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    AgentSequence {
        agents,
        reasoning,
        complexity_score: candidate.complexity_score.clamp(0.0, 1.0),
        estimated_duration_s: candidate.estimated_duration_s,
    }
}

fn build_prompt(task_description: &str, registry: &AgentRegistry) -> String {
    let mut agents_desc = String::new();
    for name in registry.names() {
        if let Some(meta) = registry.metadata(&name) {
            agents_desc.push_str(&format!("- {}: {}\n", meta.name, meta.description));
        }
    }
    format!(
        "Task: {task_description}\n\nAvailable agents:\n{agents_desc}\n\
         Respond with JSON: {{\"agents\": [...], \"reasoning\": {{...}}, \
         \"complexity_score\": 0..1, \"estimated_duration_s\": int}}"
    )
}

pub struct Planner {
    backend: Box<dyn PlannerBackend>,
    max_sequence_len: usize,
}

impl Planner {
    pub fn new(backend: Box<dyn PlannerBackend>, max_sequence_len: usize) -> Self {
        Self {
            backend,
            max_sequence_len,
        }
    }

    /// `plan(task_description, available_agents) -> AgentSequence | PlannerError`.
    pub async fn plan(
        &self,
        task_description: &str,
        registry: &AgentRegistry,
    ) -> Result<AgentSequence> {
        let prompt = build_prompt(task_description, registry);

        let candidate = match self.backend.complete(&prompt).await {
            Ok(raw) => match serde_json::from_str::<AgentSequence>(&raw) {
                Ok(parsed) if parsed.is_non_empty() => Some(parsed),
                Ok(_) => {
                    tracing::warn!("planner output was an empty agent list");
                    None
                }
                Err(err) => {
                    tracing::warn!(error = %err, "planner output failed to parse, using fallback");
                    None
                }
            },
            Err(reason) => {
                tracing::warn!(reason = %reason, "planner LLM unavailable, using fallback");
                None
            }
        };

        let sanitized = match candidate {
            Some(candidate) => {
                let sanitized = sanitize_sequence(&candidate, registry, self.max_sequence_len);
                if sanitized.is_non_empty() {
                    sanitized
                } else {
                    sanitize_sequence(
                        &template_fallback(task_description),
                        registry,
                        self.max_sequence_len,
                    )
                }
            }
            None => sanitize_sequence(
                &template_fallback(task_description),
                registry,
                self.max_sequence_len,
            ),
        };

        if !sanitized.is_non_empty() {
            return Err(WorkflowError::AllAgentsUnknown);
        }

        Ok(sanitized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_types::AgentMetadata;

    fn registry() -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        for name in ["planner", "invoice", "payment", "salesforce", "gmail", "analysis"] {
            registry.register(
                std::sync::Arc::new(crate::registry::AgentCallResult::ok(
                    serde_json::Value::Null,
                )),
                AgentMetadata::new(name, format!("{name} agent")),
            );
        }
        registry
    }

    // AgentCallResult doesn't implement Agent; provide a tiny stub agent.
    #[async_trait]
    impl crate::registry::Agent for crate::registry::AgentCallResult {
        async fn call(&self, _state: &wf_types::WorkflowState) -> crate::registry::AgentCallResult {
            self.clone()
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl PlannerBackend for FailingBackend {
        async fn complete(&self, _prompt: &str) -> std::result::Result<String, String> {
            Err("llm unreachable".to_string())
        }
    }

    struct GoodBackend;

    #[async_trait]
    impl PlannerBackend for GoodBackend {
        async fn complete(&self, _prompt: &str) -> std::result::Result<String, String> {
            Ok(serde_json::json!({
                "agents": ["planner", "gmail", "invoice", "salesforce", "analysis"],
                "reasoning": {"planner": "start"},
                "complexity_score": 0.8,
                "estimated_duration_s": 240
            })
            .to_string())
        }
    }

    #[tokio::test]
    async fn llm_unavailable_falls_back_to_template() {
        let planner = Planner::new(Box::new(FailingBackend), 10);
        let registry = registry();
        let sequence = planner
            .plan("Check invoice payment status", &registry)
            .await
            .unwrap();
        assert_eq!(sequence.agents, vec!["planner", "invoice", "analysis"]);
    }

    #[tokio::test]
    async fn no_template_match_falls_back_to_minimum_viable() {
        let planner = Planner::new(Box::new(FailingBackend), 10);
        let registry = registry();
        let sequence = planner.plan("Do something unrelated", &registry).await.unwrap();
        assert_eq!(sequence.agents, vec!["planner", "analysis"]);
    }

    #[tokio::test]
    async fn good_backend_output_is_sanitized_and_kept() {
        let planner = Planner::new(Box::new(GoodBackend), 10);
        let registry = registry();
        let sequence = planner
            .plan("HITL complex", &registry)
            .await
            .unwrap();
        assert_eq!(
            sequence.agents,
            vec!["planner", "gmail", "invoice", "salesforce", "analysis"]
        );
        assert!(sequence.complexity_score >= 0.7);
    }

    #[tokio::test]
    async fn all_agents_unknown_is_fatal() {
        let planner = Planner::new(Box::new(FailingBackend), 10);
        let empty_registry = AgentRegistry::new();
        let err = planner
            .plan("Check invoice payment status", &empty_registry)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AllAgentsUnknown));
    }

    #[test]
    fn sanitizer_dedupes_and_drops_unknown() {
        let registry = registry();
        let candidate = AgentSequence {
            agents: vec![
                "planner".into(),
                "ghost".into(),
                "invoice".into(),
                "invoice".into(),
            ],
            reasoning: HashMap::new(),
            complexity_score: 1.5,
            estimated_duration_s: 10,
        };
        let sanitized = sanitize_sequence(&candidate, &registry, 10);
        assert_eq!(sanitized.agents, vec!["planner", "invoice"]);
        assert_eq!(sanitized.complexity_score, 1.0);
    }

    #[test]
    fn sanitizer_empties_when_only_planner_survives() {
        let registry = registry();
        let candidate = AgentSequence {
            agents: vec!["planner".into(), "ghost".into()],
            reasoning: HashMap::new(),
            complexity_score: 0.1,
            estimated_duration_s: 5,
        };
        let sanitized = sanitize_sequence(&candidate, &registry, 10);
        assert!(!sanitized.is_non_empty());
    }
}
