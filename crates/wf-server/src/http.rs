use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use wf_core::{GraphType, RunSignal};
use wf_types::{
    interpret_clarification, new_id, Plan, PlanStatus, PlanStep, PlanStepStatus, ServerEventData,
    ServerEventEnvelope, WorkflowEvent, WorkflowEventType, WorkflowState, WorkflowStateEnum,
};

use crate::{AppState, WorkflowRuntime};

/// axum `Router` wiring every route in spec.md §6.1 plus the ambient
/// `/healthz` and `/internal/stats`. Grounded on the teacher's
/// `http.rs`/`Router::new().route(...)` registration idiom.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/internal/stats", get(internal_stats))
        .route("/process_request", post(process_request))
        .route("/plans", get(list_plans))
        .route("/plan", get(get_plan))
        .route("/plan_approval", post(plan_approval))
        .route("/user_clarification", post(user_clarification))
        .route("/extraction_approval", post(extraction_approval))
        .route("/teams", get(list_teams))
        .route("/teams/upload", post(upload_team))
        .route("/socket/{plan_id}", get(crate::ws::socket_handler))
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn internal_stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.approvals.get_state_statistics().await;
    let (cache_hits, cache_misses) = {
        let compiler = state.compiler.lock().await;
        (compiler.hits(), compiler.misses())
    };
    Json(json!({
        "workflows_tracked": stats.total,
        "locked_plans": stats.locked_plans,
        "by_state": stats.by_state,
        "graph_cache": {"hits": cache_hits, "misses": cache_misses},
        "cache_hit_ratio": state.perf.cache_hit_ratio().await,
    }))
}

#[derive(Debug, Deserialize)]
struct ProcessRequestInput {
    description: String,
    session_id: Option<String>,
    require_hitl: Option<bool>,
}

async fn process_request(
    State(state): State<AppState>,
    Json(input): Json<ProcessRequestInput>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let session_id = input.session_id.unwrap_or_else(new_id);
    let plan_id = new_id();
    let enable_hitl = input.require_hitl.unwrap_or(state.config.hitl_enabled);

    let sequence = state
        .planner
        .plan(&input.description, &state.registry)
        .await
        .map_err(|e| error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()))?;

    let graph_type = if sequence.complexity_score >= 0.7 {
        GraphType::AiDriven
    } else if enable_hitl {
        GraphType::HitlEnabled
    } else {
        GraphType::Default
    };

    let graph = {
        let mut compiler = state.compiler.lock().await;
        compiler
            .compile(&sequence, &state.registry, graph_type, enable_hitl)
            .await
            .map_err(|e| error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()))?
    };

    let workflow_state = WorkflowState::new(
        plan_id.clone(),
        session_id.clone(),
        input.description.clone(),
        sequence.agents.clone(),
        enable_hitl,
    );

    let mut plan = Plan::new(plan_id.clone(), session_id.clone(), input.description.clone());
    plan.status = PlanStatus::PendingApproval;
    plan.steps = sequence
        .agents
        .iter()
        .map(|agent| PlanStep {
            id: new_id(),
            description: format!("run {agent}"),
            agent: agent.clone(),
            status: PlanStepStatus::Pending,
            result: None,
        })
        .collect();

    state
        .store
        .save_plan(&plan)
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?;
    state
        .store
        .save_state(&plan_id, &workflow_state)
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?;

    state.approvals.mark_planned(&plan_id).await.ok();

    state
        .workflows
        .write()
        .await
        .insert(
            plan_id.clone(),
            WorkflowRuntime {
                sequence: sequence.clone(),
                graph,
                state: workflow_state,
            },
        );

    state
        .context
        .add_event(
            &plan_id,
            WorkflowEvent::new(WorkflowEventType::WorkflowCreated, "workflow created"),
        )
        .await;

    publish(
        &state,
        &plan_id,
        ServerEventData::PlanCreated {
            plan_id: plan_id.clone(),
            session_id: session_id.clone(),
            description: input.description.clone(),
        },
    )
    .await;
    publish(
        &state,
        &plan_id,
        ServerEventData::PlanApprovalRequest {
            plan_id: plan_id.clone(),
            agents: sequence.agents.clone(),
            complexity_score: sequence.complexity_score,
        },
    )
    .await;

    Ok(Json(json!({
        "plan_id": plan_id,
        "session_id": session_id,
        "status": "created",
    })))
}

#[derive(Debug, Deserialize)]
struct ListPlansQuery {
    session_id: Option<String>,
}

async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<ListPlansQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let plan_ids = state
        .store
        .list_plans()
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?;

    let mut summaries = Vec::new();
    for plan_id in plan_ids {
        if let Ok(plan) = state.store.load_plan(&plan_id) {
            let matches_session = query
                .session_id
                .as_deref()
                .map(|s| s == plan.session_id)
                .unwrap_or(true);
            if matches_session {
                summaries.push(json!({
                    "plan_id": plan.id,
                    "session_id": plan.session_id,
                    "status": plan.status,
                    "created_at": plan.created_at,
                }));
            }
        }
    }
    Ok(Json(json!(summaries)))
}

#[derive(Debug, Deserialize)]
struct PlanQuery {
    plan_id: String,
}

async fn get_plan(
    State(state): State<AppState>,
    Query(query): Query<PlanQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let plan = state
        .store
        .load_plan(&query.plan_id)
        .map_err(|_| error_response(StatusCode::NOT_FOUND, "plan not found"))?;
    let workflow_state = state.store.load_state(&query.plan_id).ok();
    let events = state
        .store
        .load_events(&query.plan_id, None, None)
        .unwrap_or_default();

    Ok(Json(json!({
        "plan": plan,
        "messages": workflow_state.as_ref().map(|s| &s.messages).cloned().unwrap_or_default(),
        "m_plan": workflow_state,
        "team": sequence_for(&state, &query.plan_id).await,
        "streaming_message": Value::Null,
        "events": events.into_iter().map(|e| e.event).collect::<Vec<_>>(),
    })))
}

async fn sequence_for(state: &AppState, plan_id: &str) -> Option<Vec<String>> {
    state
        .workflows
        .read()
        .await
        .get(plan_id)
        .map(|w| w.sequence.agents.clone())
}

#[derive(Debug, Deserialize)]
struct PlanApprovalInput {
    m_plan_id: String,
    approved: bool,
    feedback: Option<String>,
    modified_sequence: Option<Vec<String>>,
}

async fn plan_approval(
    State(state): State<AppState>,
    Json(input): Json<PlanApprovalInput>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let plan_id = input.m_plan_id;
    let original_sequence = sequence_for(&state, &plan_id)
        .await
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "plan not found"))?;
    let approved_sequence = input.modified_sequence.unwrap_or_else(|| original_sequence.clone());

    state
        .approvals
        .submit_plan_approval(&plan_id, input.approved, original_sequence, approved_sequence, input.feedback)
        .await
        .map_err(|e| error_response(StatusCode::CONFLICT, &e.to_string()))?;

    if let Ok(mut plan) = state.store.load_plan(&plan_id) {
        plan.status = if input.approved { PlanStatus::InProgress } else { PlanStatus::Rejected };
        plan.touch();
        state.store.save_plan(&plan).ok();
    }

    if input.approved {
        publish_status(&state, &plan_id, "in_progress").await;
        spawn_execution(state.clone(), plan_id.clone());
    } else {
        publish_status(&state, &plan_id, "rejected").await;
    }

    Ok(Json(json!({"plan_id": plan_id, "status": if input.approved { "approved" } else { "rejected" }})))
}

fn spawn_execution(state: AppState, plan_id: String) {
    tokio::spawn(async move {
        let Some((graph, workflow_state)) = ({
            let workflows = state.workflows.read().await;
            workflows.get(&plan_id).map(|w| (w.graph.clone(), w.state.clone()))
        }) else {
            return;
        };

        let cancel = tokio_util::sync::CancellationToken::new();
        let outcome = state.executor.run(&plan_id, &graph, workflow_state, cancel).await;
        handle_execution_outcome(state, plan_id, outcome).await;
    });
}

/// Re-enters the step loop after a step-wise HITL checkpoint (spec.md §5's
/// mid-run suspension). Mirrors `spawn_execution`'s shape but picks the
/// suspended `WorkflowState` back up instead of building a fresh one.
fn resume_execution(state: AppState, plan_id: String) {
    tokio::spawn(async move {
        let Some((graph, workflow_state)) = ({
            let workflows = state.workflows.read().await;
            workflows.get(&plan_id).map(|w| (w.graph.clone(), w.state.clone()))
        }) else {
            return;
        };

        let cancel = tokio_util::sync::CancellationToken::new();
        let outcome = state.executor.resume(&plan_id, &graph, workflow_state, cancel).await;
        handle_execution_outcome(state, plan_id, outcome).await;
    });
}

async fn handle_execution_outcome(
    state: AppState,
    plan_id: String,
    outcome: wf_core::Result<(WorkflowState, RunSignal)>,
) {
    match outcome {
        Ok((final_state, RunSignal::Completed)) => {
            state.store.save_state(&plan_id, &final_state).ok();
            if let Some(workflow) = state.workflows.write().await.get_mut(&plan_id) {
                workflow.state = final_state.clone();
            }
            publish(
                &state,
                &plan_id,
                ServerEventData::FinalResultMessage {
                    content: final_state.final_result.clone().unwrap_or(Value::Null),
                    status: "awaiting_result_approval".to_string(),
                },
            )
            .await;
        }
        Ok((suspended_state, RunSignal::Suspended)) => {
            state.store.save_state(&plan_id, &suspended_state).ok();
            if let Some(workflow) = state.workflows.write().await.get_mut(&plan_id) {
                workflow.state = suspended_state;
            }
        }
        Err(e) => {
            tracing::error!(plan_id = %plan_id, error = %e, "workflow execution failed");
            if let Ok(mut plan) = state.store.load_plan(&plan_id) {
                plan.status = PlanStatus::Failed;
                plan.touch();
                state.store.save_plan(&plan).ok();
            }
            publish(
                &state,
                &plan_id,
                ServerEventData::Error {
                    agent_name: None,
                    error: e.to_string(),
                    recoverable: false,
                },
            )
            .await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserClarificationInput {
    plan_id: String,
    #[allow(dead_code)]
    request_id: String,
    answer: String,
}

async fn user_clarification(
    State(state): State<AppState>,
    Json(input): Json<UserClarificationInput>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let approved = interpret_clarification(&input.answer);
    let current_state = state.approvals.current_state(&input.plan_id).await;

    if current_state == Some(WorkflowStateEnum::Executing) {
        return resume_from_step_checkpoint(state, input.plan_id, approved).await;
    }

    if current_state != Some(WorkflowStateEnum::AwaitingResultApproval) {
        return Err(error_response(
            StatusCode::CONFLICT,
            "workflow is not awaiting a result approval",
        ));
    }

    let final_result = state
        .workflows
        .read()
        .await
        .get(&input.plan_id)
        .and_then(|w| w.state.final_result.clone())
        .unwrap_or(Value::Null);

    state
        .approvals
        .submit_result_approval(&input.plan_id, approved, final_result, Some(input.answer))
        .await
        .map_err(|e| error_response(StatusCode::CONFLICT, &e.to_string()))?;

    let status = if approved { "completed" } else { "restarted" };
    if let Ok(mut plan) = state.store.load_plan(&input.plan_id) {
        plan.status = if approved { PlanStatus::Completed } else { PlanStatus::Restarted };
        plan.touch();
        state.store.save_plan(&plan).ok();
    }
    publish_status(&state, &input.plan_id, status).await;

    Ok(Json(json!({"plan_id": input.plan_id, "status": status})))
}

/// Handles a clarification answer while the workflow is suspended mid-run at
/// a per-node HITL checkpoint (`GraphType::HitlEnabled`), distinct from the
/// end-of-run result approval `user_clarification` otherwise services.
async fn resume_from_step_checkpoint(
    state: AppState,
    plan_id: String,
    approved: bool,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let awaiting = state
        .workflows
        .read()
        .await
        .get(&plan_id)
        .map(|w| w.state.awaiting_user_input)
        .unwrap_or(false);

    if !awaiting {
        return Err(error_response(
            StatusCode::CONFLICT,
            "workflow is not awaiting a step-wise clarification",
        ));
    }

    if approved {
        resume_execution(state.clone(), plan_id.clone());
        return Ok(Json(json!({"plan_id": plan_id, "status": "resumed"})));
    }

    state
        .approvals
        .cancel(&plan_id)
        .await
        .map_err(|e| error_response(StatusCode::CONFLICT, &e.to_string()))?;
    if let Ok(mut plan) = state.store.load_plan(&plan_id) {
        plan.status = PlanStatus::Failed;
        plan.touch();
        state.store.save_plan(&plan).ok();
    }
    publish_status(&state, &plan_id, "failed").await;
    Ok(Json(json!({"plan_id": plan_id, "status": "cancelled"})))
}

#[derive(Debug, Deserialize)]
struct ExtractionApprovalInput {
    plan_id: String,
    approved: bool,
    feedback: Option<String>,
    #[allow(dead_code)]
    edited_data: Option<Value>,
}

/// A specialization tag on the same approval state machine, not a parallel
/// mechanism (SPEC_FULL.md Open Question resolution 1).
async fn extraction_approval(
    State(state): State<AppState>,
    Json(input): Json<ExtractionApprovalInput>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let final_result = state
        .workflows
        .read()
        .await
        .get(&input.plan_id)
        .and_then(|w| w.state.final_result.clone())
        .unwrap_or(Value::Null);

    state
        .approvals
        .submit_result_approval(&input.plan_id, input.approved, final_result, input.feedback)
        .await
        .map_err(|e| error_response(StatusCode::CONFLICT, &e.to_string()))?;

    let status = if input.approved { "completed" } else { "restarted" };
    publish_status(&state, &input.plan_id, status).await;
    Ok(Json(json!({"plan_id": input.plan_id, "status": status})))
}

/// Team configuration CRUD; opaque to the core (spec.md §6.1).
async fn list_teams() -> Json<Value> {
    Json(json!([]))
}

async fn upload_team(Json(_input): Json<Value>) -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn publish_status(state: &AppState, plan_id: &str, status: &str) {
    publish(
        state,
        plan_id,
        ServerEventData::ProgressUpdate {
            current_step: state
                .workflows
                .read()
                .await
                .get(plan_id)
                .map(|w| w.state.current_step)
                .unwrap_or(0),
            total_steps: state
                .workflows
                .read()
                .await
                .get(plan_id)
                .map(|w| w.sequence.agents.len())
                .unwrap_or(0),
            current_agent: None,
        },
    )
    .await;
    let _ = status;
}

async fn publish(state: &AppState, plan_id: &str, data: ServerEventData) {
    state.fanout.publish(plan_id, ServerEventEnvelope::new(data)).await;
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({"error": message})))
}
