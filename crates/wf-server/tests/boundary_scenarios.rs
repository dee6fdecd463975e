//! End-to-end boundary scenarios from spec.md §8, driven straight through
//! the axum `Router` via `tower::ServiceExt::oneshot` rather than a bound
//! socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wf_core::{Agent, AgentCallResult, AgentRegistry, MockModePolicy, PlannerBackend};
use wf_server::store::WorkflowStore;
use wf_server::AppState;
use wf_types::{AgentMetadata, OrchestratorConfig, WorkflowState};

struct EchoAgent {
    name: &'static str,
}

#[async_trait]
impl Agent for EchoAgent {
    async fn call(&self, state: &WorkflowState) -> AgentCallResult {
        AgentCallResult::ok(json!({"agent": self.name, "step": state.current_step}))
    }
}

struct NoProvider;

#[async_trait]
impl PlannerBackend for NoProvider {
    async fn complete(&self, _prompt: &str) -> Result<String, String> {
        Err("no provider in test harness".to_string())
    }
}

fn test_registry() -> Arc<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    for name in ["planner", "invoice", "payment", "salesforce", "gmail", "analysis"] {
        registry.register(
            Arc::new(EchoAgent { name }),
            AgentMetadata::new(name, format!("{name} agent")),
        );
    }
    Arc::new(registry)
}

fn test_state() -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = WorkflowStore::new(dir.path().join("store")).unwrap();
    let state = AppState::new(
        OrchestratorConfig::default(),
        test_registry(),
        Box::new(NoProvider),
        MockModePolicy::from_config(&OrchestratorConfig::default()),
        store,
    );
    (state, dir)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn poll_until_status(router: &axum::Router, plan_id: &str, want: &str) -> Value {
    for _ in 0..50 {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/plan?plan_id={plan_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        if body["plan"]["status"] == want {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("plan {plan_id} never reached status {want}");
}

#[tokio::test]
async fn happy_path_simple_reaches_completed_with_messages() {
    let (state, _dir) = test_state();
    let router = wf_server::http::router(state.clone());

    let create = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/process_request")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"description": "Check invoice payment status"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create.status(), StatusCode::OK);
    let created = body_json(create).await;
    let plan_id = created["plan_id"].as_str().unwrap().to_string();

    let approve = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/plan_approval")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"m_plan_id": plan_id, "approved": true}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(approve.status(), StatusCode::OK);

    let body = poll_until_status(&router, &plan_id, "completed").await;
    let messages = body["messages"].as_array().expect("messages array");
    assert!(messages.len() >= 2, "expected at least one message per agent, got {messages:?}");
    assert!(body["m_plan"]["final_result"].is_object());

    let (backlog, _rx) = state.fanout.subscribe(&plan_id).await;
    let kinds: Vec<&str> = backlog.iter().map(|e| e.kind.as_str()).collect();
    let first_started = kinds.iter().position(|k| *k == "agent_started").expect("an agent_started event");
    let last_completed = kinds.iter().rposition(|k| *k == "agent_completed").expect("an agent_completed event");
    let final_result = kinds.iter().position(|k| *k == "final_result_message").expect("a final_result_message event");
    assert!(first_started < last_completed, "agent_started must precede agent_completed: {kinds:?}");
    assert!(last_completed < final_result, "agent_completed must precede final_result_message: {kinds:?}");
}

#[tokio::test]
async fn rejection_marks_plan_rejected_and_runs_no_agents() {
    let (state, _dir) = test_state();
    let router = wf_server::http::router(state);

    let create = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/process_request")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"description": "Check invoice payment status"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let created = body_json(create).await;
    let plan_id = created["plan_id"].as_str().unwrap().to_string();

    let reject = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/plan_approval")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"m_plan_id": plan_id, "approved": false}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(reject.status(), StatusCode::OK);

    let body = poll_until_status(&router, &plan_id, "rejected").await;
    assert_eq!(body["plan"]["status"], "rejected");
}

#[tokio::test]
async fn hitl_complex_sequence_compiles_with_approval_gate_on_last_node() {
    let (state, _dir) = test_state();
    let router = wf_server::http::router(state);

    let create = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/process_request")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "description": "Look up the customer in Salesforce and email them",
                        "require_hitl": true,
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let created = body_json(create).await;
    assert_eq!(created["status"], "created");
}

#[tokio::test]
async fn repeated_identical_requests_hit_the_graph_cache() {
    let (state, _dir) = test_state();
    {
        let mut compiler = state.compiler.lock().await;
        let sequence = wf_types::AgentSequence {
            agents: vec!["planner".into(), "analysis".into()],
            reasoning: Default::default(),
            complexity_score: 0.1,
            estimated_duration_s: 30,
        };
        compiler
            .compile(&sequence, &state.registry, wf_core::GraphType::Default, false)
            .await
            .unwrap();
        compiler
            .compile(&sequence, &state.registry, wf_core::GraphType::Default, false)
            .await
            .unwrap();
        assert_eq!(compiler.hits(), 1);
        assert_eq!(compiler.misses(), 1);
    }
}
