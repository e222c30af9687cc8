use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use quorumd::api::{self, AppState};
use quorumd::models::{ExecutionStatus, JobExecution, JobStatus, NodeStatus};
use quorumd::store::Store;

async fn create_test_app() -> (Router, AppState) {
    let store = Store::in_memory().await.unwrap();
    let state = AppState::new(store);
    (api::router(state.clone()), state)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn job_request() -> Value {
    json!({
        "name": "hash-the-classics",
        "docker_image": "alpine:latest",
        "command": ["echo", "hello"],
        "environment": {"MODE": "test"},
    })
}

fn node_request(id: &str) -> Value {
    json!({
        "id": id,
        "name": format!("node {id}"),
        "region": "eu-west",
        "cpu_cores": 4,
        "memory_gb": 8,
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _state) = create_test_app().await;

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_submit_job_applies_defaults() {
    let (app, _state) = create_test_app().await;

    let (status, body) = post(&app, "/api/v1/jobs", job_request()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["required_cpu"], 1);
    assert_eq!(body["required_memory"], 1);
    assert_eq!(body["redundancy"], 3);
    assert_eq!(body["consensus"], 2);
    assert!(body["id"].as_str().is_some());
}

#[tokio::test]
async fn test_submit_job_validation() {
    let (app, _state) = create_test_app().await;

    let mut missing_name = job_request();
    missing_name["name"] = json!("");
    let (status, body) = post(&app, "/api/v1/jobs", missing_name).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("name"));

    let mut empty_command = job_request();
    empty_command["command"] = json!([]);
    let (status, body) = post(&app, "/api/v1/jobs", empty_command).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("command"));
}

#[tokio::test]
async fn test_list_jobs_envelope() {
    let (app, _state) = create_test_app().await;

    post(&app, "/api/v1/jobs", job_request()).await;
    post(&app, "/api/v1/jobs", job_request()).await;

    let (status, body) = get(&app, "/api/v1/jobs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["jobs"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_get_job_not_found() {
    let (app, _state) = create_test_app().await;

    let (status, body) = get(&app, "/api/v1/jobs/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn test_register_node_and_list() {
    let (app, _state) = create_test_app().await;

    let (status, body) = post(&app, "/api/v1/nodes/register", node_request("worker-1")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "worker-1");
    assert_eq!(body["status"], "online");
    assert_eq!(body["reputation_score"], 100.0);

    let (status, body) = get(&app, "/api/v1/nodes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["nodes"][0]["id"], "worker-1");

    let (status, _body) = get(&app, "/api/v1/nodes/worker-1").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_register_node_validation() {
    let (app, _state) = create_test_app().await;

    let mut bad = node_request("w");
    bad["cpu_cores"] = json!(0);
    let (status, _body) = post(&app, "/api/v1/nodes/register", bad).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_heartbeat_round_trip() {
    let (app, state) = create_test_app().await;

    post(&app, "/api/v1/nodes/register", node_request("hb-node")).await;
    state
        .store
        .update_node_status("hb-node", NodeStatus::Offline)
        .await
        .unwrap();

    let heartbeat = json!({"cpu_usage": 12.5, "memory_usage": 40.0, "active_jobs": 0});
    let (status, body) = post(&app, "/api/v1/nodes/hb-node/heartbeat", heartbeat).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let node = state.store.get_node("hb-node").await.unwrap();
    assert_eq!(node.status, NodeStatus::Online);

    let (status, _body) = post(&app, "/api/v1/nodes/ghost/heartbeat", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pending_jobs_for_node() {
    let (app, state) = create_test_app().await;

    post(&app, "/api/v1/nodes/register", node_request("poller")).await;
    let (_, job_body) = post(&app, "/api/v1/jobs", job_request()).await;
    let job_id = job_body["id"].as_str().unwrap().to_string();

    state
        .store
        .create_job_execution(&JobExecution::new(&job_id, "poller"))
        .await
        .unwrap();

    let (status, body) = get(&app, "/api/v1/nodes/poller/pending-jobs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["pending_jobs"][0]["job"]["id"], job_id.as_str());
    assert!(body["pending_jobs"][0]["execution_id"].as_str().is_some());

    let (status, _body) = get(&app, "/api/v1/nodes/ghost/pending-jobs").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_submit_result_completes_execution() {
    let (app, state) = create_test_app().await;

    post(&app, "/api/v1/nodes/register", node_request("runner")).await;
    state
        .store
        .update_node_status("runner", NodeStatus::Busy)
        .await
        .unwrap();
    let (_, job_body) = post(&app, "/api/v1/jobs", job_request()).await;
    let job_id = job_body["id"].as_str().unwrap().to_string();

    let execution = JobExecution::new(&job_id, "runner");
    state.store.create_job_execution(&execution).await.unwrap();

    let submission = json!({
        "execution_id": execution.id,
        "job_id": job_id,
        "node_id": "runner",
        "result": "hello\n",
        "result_hash": "deadbeef",
        "logs": "hello\n",
    });
    let (status, body) = post(&app, "/api/v1/worker/result", submission).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let executions = state.store.list_job_executions(&job_id).await.unwrap();
    assert_eq!(executions[0].status, ExecutionStatus::Completed);
    assert_eq!(executions[0].result_hash, "deadbeef");
    assert!(executions[0].completed_at.is_some());

    // The node is released back to the pool.
    let node = state.store.get_node("runner").await.unwrap();
    assert_eq!(node.status, NodeStatus::Online);
}

#[tokio::test]
async fn test_submit_result_with_error_fails_execution() {
    let (app, state) = create_test_app().await;

    post(&app, "/api/v1/nodes/register", node_request("runner")).await;
    let (_, job_body) = post(&app, "/api/v1/jobs", job_request()).await;
    let job_id = job_body["id"].as_str().unwrap().to_string();

    let execution = JobExecution::new(&job_id, "runner");
    state.store.create_job_execution(&execution).await.unwrap();

    let submission = json!({
        "execution_id": execution.id,
        "job_id": job_id,
        "node_id": "runner",
        "error_message": "container exited with code 1",
        "logs": "stack trace",
    });
    let (status, _body) = post(&app, "/api/v1/worker/result", submission).await;
    assert_eq!(status, StatusCode::OK);

    let executions = state.store.list_job_executions(&job_id).await.unwrap();
    assert_eq!(executions[0].status, ExecutionStatus::Failed);
    assert_eq!(executions[0].error_message, "container exited with code 1");
}

#[tokio::test]
async fn test_submit_result_unknown_execution() {
    let (app, _state) = create_test_app().await;

    let (_, job_body) = post(&app, "/api/v1/jobs", job_request()).await;
    let submission = json!({
        "execution_id": "missing",
        "job_id": job_body["id"],
        "node_id": "runner",
        "result": "x",
    });
    let (status, _body) = post(&app, "/api/v1/worker/result", submission).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_job_executions_endpoint() {
    let (app, state) = create_test_app().await;

    let (_, job_body) = post(&app, "/api/v1/jobs", job_request()).await;
    let job_id = job_body["id"].as_str().unwrap().to_string();
    state
        .store
        .create_job_execution(&JobExecution::new(&job_id, "n1"))
        .await
        .unwrap();
    state
        .store
        .create_job_execution(&JobExecution::new(&job_id, "n2"))
        .await
        .unwrap();

    let (status, body) = get(&app, &format!("/api/v1/jobs/{job_id}/executions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], job_id.as_str());
    assert_eq!(body["count"], 2);

    let (status, _body) = get(&app, "/api/v1/jobs/missing/executions").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stats_endpoint() {
    let (app, state) = create_test_app().await;

    post(&app, "/api/v1/nodes/register", node_request("s1")).await;
    post(&app, "/api/v1/nodes/register", node_request("s2")).await;
    state
        .store
        .update_node_status("s2", NodeStatus::Busy)
        .await
        .unwrap();

    let (_, job_body) = post(&app, "/api/v1/jobs", job_request()).await;
    post(&app, "/api/v1/jobs", job_request()).await;
    state
        .store
        .update_job_status(
            job_body["id"].as_str().unwrap(),
            JobStatus::Completed,
            "out",
            "",
        )
        .await
        .unwrap();

    let (status, body) = get(&app, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodes"]["total"], 2);
    assert_eq!(body["nodes"]["online"], 1);
    assert_eq!(body["nodes"]["busy"], 1);
    assert_eq!(body["resources"]["total_cpu_cores"], 8);
    assert_eq!(body["resources"]["total_memory_gb"], 16);
    assert_eq!(body["jobs"]["total"], 2);
    assert_eq!(body["jobs"]["completed"], 1);
}

#[tokio::test]
async fn test_metrics_endpoint_counts_submissions() {
    let (app, _state) = create_test_app().await;

    post(&app, "/api/v1/jobs", job_request()).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("quorumd_jobs_submitted_total 1"));
}
