use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of nodes a job runs on.
pub const DEFAULT_REDUNDANCY: i64 = 3;
/// Default number of matching result hashes required to accept a result.
pub const DEFAULT_CONSENSUS: i64 = 2;
/// Reputation every node starts with.
pub const INITIAL_REPUTATION: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Scheduled,
    Running,
    Verifying,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Scheduled => write!(f, "scheduled"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Verifying => write!(f, "verifying"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// State of one attempt of one job on one node. A separate enum from
/// [`JobStatus`]: executions never enter the verifying pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Scheduled => write!(f, "scheduled"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Busy,
    Offline,
    Faulty,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Online => write!(f, "online"),
            NodeStatus::Busy => write!(f, "busy"),
            NodeStatus::Offline => write!(f, "offline"),
            NodeStatus::Faulty => write!(f, "faulty"),
        }
    }
}

/// A containerized compute job. The specification fields (image, command,
/// environment, resource requirements, redundancy/consensus) are immutable
/// after submission; only status and the result fields change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub docker_image: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub input_data: String,
    pub required_cpu: i64,
    /// Required memory in GB.
    pub required_memory: i64,
    pub required_gpu: bool,
    /// N: how many nodes the job runs on.
    pub redundancy: i64,
    /// K: how many result hashes must agree.
    pub consensus: i64,
    pub status: JobStatus,
    #[serde(default)]
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub error_message: String,
    pub credits_required: i64,
}

impl Job {
    /// Build a pending job from a submit request, applying defaults.
    pub fn from_request(req: JobSubmitRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: req.name,
            description: req.description,
            docker_image: req.docker_image,
            command: req.command,
            environment: req.environment,
            input_data: req.input_data,
            required_cpu: req.required_cpu.max(1),
            required_memory: req.required_memory.max(1),
            required_gpu: req.required_gpu,
            redundancy: DEFAULT_REDUNDANCY,
            consensus: DEFAULT_CONSENSUS,
            status: JobStatus::Pending,
            submitted_by: "user".to_string(),
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: String::new(),
            error_message: String::new(),
            credits_required: 1,
        }
    }
}

/// A worker node. Registration is an upsert keyed on the client-supplied id:
/// capability fields refresh, reputation and the job counters survive.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub region: String,
    pub cpu_cores: i64,
    pub memory_gb: i64,
    pub gpu_enabled: bool,
    #[serde(default)]
    pub gpu_model: String,
    pub status: NodeStatus,
    pub reputation_score: f64,
    pub total_jobs_run: i64,
    pub successful_jobs_run: i64,
    pub failed_jobs: i64,
    pub credits_earned: i64,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl Node {
    pub fn from_request(req: NodeRegisterRequest) -> Self {
        let now = Utc::now();
        Self {
            id: req.id,
            name: req.name,
            region: req.region,
            cpu_cores: req.cpu_cores,
            memory_gb: req.memory_gb,
            gpu_enabled: req.gpu_enabled,
            gpu_model: req.gpu_model,
            status: NodeStatus::Online,
            reputation_score: INITIAL_REPUTATION,
            total_jobs_run: 0,
            successful_jobs_run: 0,
            failed_jobs: 0,
            credits_earned: 0,
            last_heartbeat: now,
            registered_at: now,
        }
    }
}

/// One attempt of one job on one node. Created by the scheduler in
/// `Scheduled` status; the worker's result submission drives it to
/// `Completed` or `Failed` (last writer wins).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobExecution {
    pub id: String,
    pub job_id: String,
    pub node_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub result_hash: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub logs: String,
}

impl JobExecution {
    pub fn new(job_id: &str, node_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            node_id: node_id.to_string(),
            status: ExecutionStatus::Scheduled,
            started_at: Utc::now(),
            completed_at: None,
            result: String::new(),
            result_hash: String::new(),
            error_message: String::new(),
            logs: String::new(),
        }
    }
}

/// Outcome of a k-of-n verification pass. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub job_id: String,
    pub total_executions: usize,
    pub result_counts: HashMap<String, usize>,
    pub consensus_result: String,
    pub consensus_reached: bool,
    pub agreement_nodes: Vec<String>,
    pub disagreement_nodes: Vec<String>,
}

impl VerificationResult {
    /// Result for a job that does not yet have enough completed executions.
    pub fn pending(job_id: &str, total_executions: usize) -> Self {
        Self {
            job_id: job_id.to_string(),
            total_executions,
            result_counts: HashMap::new(),
            consensus_result: String::new(),
            consensus_reached: false,
            agreement_nodes: Vec::new(),
            disagreement_nodes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobSubmitRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub docker_image: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub input_data: String,
    #[serde(default)]
    pub required_cpu: i64,
    #[serde(default)]
    pub required_memory: i64,
    #[serde(default)]
    pub required_gpu: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeRegisterRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub region: String,
    pub cpu_cores: i64,
    pub memory_gb: i64,
    #[serde(default)]
    pub gpu_enabled: bool,
    #[serde(default)]
    pub gpu_model: String,
}

/// Liveness report from a worker. Only the arrival matters to the core;
/// the usage numbers are informational.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub active_jobs: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobResultSubmission {
    pub execution_id: String,
    pub job_id: String,
    pub node_id: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub result_hash: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub logs: String,
}
