use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::dispatch::{AssignedJob, Dispatch, DispatchService};
use crate::error::QuorumError;
use crate::metrics::Metrics;
use crate::models::{
    HeartbeatRequest, Job, JobExecution, JobResultSubmission, JobStatus, JobSubmitRequest, Node,
    NodeRegisterRequest, NodeStatus,
};
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub dispatch: DispatchService,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(store: Store) -> Self {
        let dispatch = DispatchService::new(store.clone());
        Self {
            store,
            dispatch,
            metrics: Metrics::new(),
        }
    }
}

impl IntoResponse for QuorumError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            QuorumError::JobNotFound(_)
            | QuorumError::NodeNotFound(_)
            | QuorumError::ExecutionNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            QuorumError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            _ => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .route("/api/v1/jobs", post(submit_job).get(list_jobs))
        .route("/api/v1/jobs/{id}", get(get_job))
        .route("/api/v1/jobs/{id}/executions", get(list_job_executions))
        .route("/api/v1/nodes/register", post(register_node))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/nodes/{id}", get(get_node))
        .route("/api/v1/nodes/{id}/heartbeat", post(node_heartbeat))
        .route("/api/v1/nodes/{id}/pending-jobs", get(pending_jobs))
        .route("/api/v1/worker/result", post(submit_result))
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "time": Utc::now().to_rfc3339(),
    }))
}

async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<JobSubmitRequest>,
) -> Result<impl IntoResponse, QuorumError> {
    if req.name.trim().is_empty() {
        return Err(QuorumError::InvalidRequest("name is required".to_string()));
    }
    if req.docker_image.trim().is_empty() {
        return Err(QuorumError::InvalidRequest(
            "docker_image is required".to_string(),
        ));
    }
    if req.command.is_empty() {
        return Err(QuorumError::InvalidRequest(
            "command must not be empty".to_string(),
        ));
    }

    let job = Job::from_request(req);
    state.store.create_job(&job).await?;
    state.metrics.jobs_submitted.inc();

    tracing::info!(job_id = %job.id, name = %job.name, "Job submitted");

    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Serialize)]
struct JobsResponse {
    jobs: Vec<Job>,
    count: usize,
}

async fn list_jobs(State(state): State<AppState>) -> Result<impl IntoResponse, QuorumError> {
    let jobs = state.store.list_jobs().await?;
    let count = jobs.len();
    Ok(Json(JobsResponse { jobs, count }))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, QuorumError> {
    let job = state.store.get_job(&id).await?;
    Ok(Json(job))
}

#[derive(Serialize)]
struct ExecutionsResponse {
    job_id: String,
    executions: Vec<JobExecution>,
    count: usize,
}

async fn list_job_executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, QuorumError> {
    // 404 for an unknown job rather than an empty list.
    state.store.get_job(&id).await?;
    let executions = state.store.list_job_executions(&id).await?;
    let count = executions.len();
    Ok(Json(ExecutionsResponse {
        job_id: id,
        executions,
        count,
    }))
}

async fn register_node(
    State(state): State<AppState>,
    Json(req): Json<NodeRegisterRequest>,
) -> Result<impl IntoResponse, QuorumError> {
    if req.id.trim().is_empty() {
        return Err(QuorumError::InvalidRequest("id is required".to_string()));
    }
    if req.name.trim().is_empty() {
        return Err(QuorumError::InvalidRequest("name is required".to_string()));
    }
    if req.cpu_cores < 1 || req.memory_gb < 1 {
        return Err(QuorumError::InvalidRequest(
            "cpu_cores and memory_gb must be at least 1".to_string(),
        ));
    }

    let node = state.dispatch.register_node(req).await?;
    state.metrics.nodes_registered.inc();
    Ok((StatusCode::CREATED, Json(node)))
}

#[derive(Serialize)]
struct NodesResponse {
    nodes: Vec<Node>,
    count: usize,
}

async fn list_nodes(State(state): State<AppState>) -> Result<impl IntoResponse, QuorumError> {
    let nodes = state.store.list_nodes().await?;
    let count = nodes.len();
    Ok(Json(NodesResponse { nodes, count }))
}

async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, QuorumError> {
    let node = state.store.get_node(&id).await?;
    Ok(Json(node))
}

async fn node_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(heartbeat): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, QuorumError> {
    state.dispatch.heartbeat(&id, heartbeat).await?;
    state.metrics.heartbeats_received.inc();
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[derive(Serialize)]
struct PendingJobsResponse {
    pending_jobs: Vec<AssignedJob>,
    count: usize,
}

async fn pending_jobs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, QuorumError> {
    // Unknown nodes get a 404 instead of an empty assignment list.
    state.store.get_node(&id).await?;
    let pending_jobs = state.dispatch.fetch_assigned(&id).await?;
    let count = pending_jobs.len();
    Ok(Json(PendingJobsResponse {
        pending_jobs,
        count,
    }))
}

async fn submit_result(
    State(state): State<AppState>,
    Json(submission): Json<JobResultSubmission>,
) -> Result<impl IntoResponse, QuorumError> {
    state.dispatch.submit_result(submission).await?;
    state.metrics.results_received.inc();
    Ok(Json(serde_json::json!({ "status": "accepted" })))
}

#[derive(Serialize)]
struct NodeStats {
    total: usize,
    online: usize,
    busy: usize,
}

#[derive(Serialize)]
struct ResourceStats {
    total_cpu_cores: i64,
    total_memory_gb: i64,
}

#[derive(Serialize)]
struct JobStats {
    total: usize,
    completed: usize,
    running: usize,
    failed: usize,
}

#[derive(Serialize)]
struct StatsResponse {
    nodes: NodeStats,
    resources: ResourceStats,
    jobs: JobStats,
}

async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, QuorumError> {
    let nodes = state.store.list_nodes().await?;
    let jobs = state.store.list_jobs().await?;

    let online = nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Online)
        .count();
    let busy = nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Busy)
        .count();
    let total_cpu_cores = nodes.iter().map(|n| n.cpu_cores).sum();
    let total_memory_gb = nodes.iter().map(|n| n.memory_gb).sum();

    let completed = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .count();
    let running = jobs
        .iter()
        .filter(|j| matches!(j.status, JobStatus::Scheduled | JobStatus::Running))
        .count();
    let failed = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Failed)
        .count();

    Ok(Json(StatsResponse {
        nodes: NodeStats {
            total: nodes.len(),
            online,
            busy,
        },
        resources: ResourceStats {
            total_cpu_cores,
            total_memory_gb,
        },
        jobs: JobStats {
            total: jobs.len(),
            completed,
            running,
            failed,
        },
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.gather()
}
