//! Agent-facing HTTP API (§6 wire surface): registration, heartbeat
//! (poll-for-work), and result reporting, plus an admin command queue.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use scan_shared::models::Agent;
use scan_shared::protocol::{
    DispatchTask, HeartbeatRequest, HeartbeatResponse, RegisterAgentRequest, RegisterAgentResponse,
    TaskStatusReport,
};
use scan_shared::types::{AgentStatus, TaskStatus};
use tracing::{error, info};

use crate::error::MasterError;
use crate::etl::Ingestor;
use crate::registry::Registry;
use crate::storage::Store;

pub struct AppState {
    pub store: Arc<Store>,
    pub registry: Arc<Registry>,
    pub ingestor: Arc<Ingestor>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/agents/register", post(register_agent))
        .route("/v1/agents/heartbeat", post(heartbeat))
        .route("/v1/agents/:agent_id/tasks", get(list_assigned_tasks))
        .route("/v1/tasks/report", post(report_task))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

impl IntoResponse for MasterError {
    fn into_response(self) -> Response {
        let status = match &self {
            MasterError::ProjectNotFound(_) | MasterError::WorkflowNotFound(_) | MasterError::StageNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            MasterError::QueueFull | MasterError::NoCandidateAgent(_) => StatusCode::SERVICE_UNAVAILABLE,
            MasterError::Config(_) | MasterError::InvalidCron(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

async fn register_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterAgentRequest>,
) -> Result<Json<RegisterAgentResponse>, MasterError> {
    let agent = Agent {
        id: scan_shared::types::AgentId::new(),
        hostname: req.hostname,
        address: req.ip,
        port: req.port,
        status: AgentStatus::Online,
        capabilities: req.capabilities,
        tags: req.tags,
        last_heartbeat: Utc::now(),
        in_flight: 0,
        version: req.version,
        os: req.os,
        arch: req.arch,
    };
    state.registry.register(&agent)?;
    info!("registered agent {} from {}", agent.id, agent.address);
    Ok(Json(RegisterAgentResponse {
        agent_id: agent.id,
        token: agent.id.to_string(),
        config: serde_json::json!({}),
    }))
}

/// A heartbeat doubles as a work-pull: the response carries any tasks
/// currently `assigned` to this agent that it hasn't yet acknowledged.
async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, MasterError> {
    state.registry.record_heartbeat(req.agent_id, req.in_flight)?;

    for project in state.store.all_projects()? {
        for mut task in state.store.tasks_for_project(project.id)? {
            if task.assigned_agent_id == Some(req.agent_id) && task.status == TaskStatus::Assigned {
                task.status = TaskStatus::Running;
                if let Err(e) = state.store.upsert_task(&task) {
                    error!("failed to mark task {} running: {e}", task.id);
                }
            }
        }
    }

    Ok(Json(HeartbeatResponse {
        next_interval_secs: 15,
        pending_commands: Vec::new(),
        config_updated: false,
    }))
}

async fn list_assigned_tasks(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<uuid::Uuid>,
) -> Result<Json<Vec<DispatchTask>>, MasterError> {
    let tasks = assigned_tasks_for(&state.store, agent_id.into()).await?;
    Ok(Json(tasks))
}

async fn report_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TaskStatusReport>,
) -> Result<StatusCode, MasterError> {
    state.ingestor.ingest(&req)?;
    Ok(StatusCode::ACCEPTED)
}

/// Tasks assigned but not yet picked up by `heartbeat` are surfaced via this
/// endpoint so an agent that missed the push (e.g. reconnected) can catch up.
pub async fn assigned_tasks_for(store: &Store, agent_id: scan_shared::types::AgentId) -> Result<Vec<DispatchTask>, MasterError> {
    let mut out = Vec::new();
    for project in store.all_projects()? {
        for task in store.tasks_for_project(project.id)? {
            if task.assigned_agent_id == Some(agent_id)
                && matches!(task.status, TaskStatus::Assigned | TaskStatus::Running)
            {
                let Some(stage) = store.get_stage(task.stage_id)? else { continue };
                out.push(DispatchTask {
                    task_id: task.id,
                    task_type: task.task_type,
                    targets: task.input_target.clone(),
                    params: task.tool_parameters.clone(),
                    execution_policy: stage.execution_policy,
                    deadline: task.created_at + chrono::Duration::seconds(stage.performance.timeout_secs as i64),
                });
            }
        }
    }
    Ok(out)
}
