use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{FromRow, Row, SqlitePool};

use crate::error::{QuorumError, Result};
use crate::models::{ExecutionStatus, Job, JobExecution, JobStatus, Node, NodeStatus};

/// Newest-first job listings are capped at this many rows.
const LIST_JOBS_LIMIT: i64 = 100;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    description      TEXT NOT NULL DEFAULT '',
    docker_image     TEXT NOT NULL,
    command          TEXT NOT NULL,
    environment      TEXT NOT NULL DEFAULT '{}',
    input_data       TEXT NOT NULL DEFAULT '',
    required_cpu     INTEGER NOT NULL DEFAULT 1,
    required_memory  INTEGER NOT NULL DEFAULT 1,
    required_gpu     INTEGER NOT NULL DEFAULT 0,
    redundancy       INTEGER NOT NULL DEFAULT 3,
    consensus        INTEGER NOT NULL DEFAULT 2,
    status           TEXT NOT NULL,
    submitted_by     TEXT NOT NULL DEFAULT '',
    submitted_at     TEXT NOT NULL,
    started_at       TEXT,
    completed_at     TEXT,
    result           TEXT NOT NULL DEFAULT '',
    error_message    TEXT NOT NULL DEFAULT '',
    credits_required INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS nodes (
    id                  TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    region              TEXT NOT NULL DEFAULT '',
    cpu_cores           INTEGER NOT NULL,
    memory_gb           INTEGER NOT NULL,
    gpu_enabled         INTEGER NOT NULL DEFAULT 0,
    gpu_model           TEXT NOT NULL DEFAULT '',
    status              TEXT NOT NULL,
    reputation_score    REAL NOT NULL DEFAULT 100.0,
    total_jobs_run      INTEGER NOT NULL DEFAULT 0,
    successful_jobs_run INTEGER NOT NULL DEFAULT 0,
    failed_jobs         INTEGER NOT NULL DEFAULT 0,
    credits_earned      INTEGER NOT NULL DEFAULT 0,
    last_heartbeat      TEXT NOT NULL,
    registered_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS job_executions (
    id            TEXT PRIMARY KEY,
    job_id        TEXT NOT NULL REFERENCES jobs(id),
    node_id       TEXT NOT NULL REFERENCES nodes(id),
    status        TEXT NOT NULL,
    started_at    TEXT NOT NULL,
    completed_at  TEXT,
    result        TEXT NOT NULL DEFAULT '',
    result_hash   TEXT NOT NULL DEFAULT '',
    error_message TEXT NOT NULL DEFAULT '',
    logs          TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(status);
CREATE INDEX IF NOT EXISTS idx_executions_job_id ON job_executions(job_id);
CREATE INDEX IF NOT EXISTS idx_executions_node_id ON job_executions(node_id);
"#;

const JOB_COLUMNS: &str = "id, name, description, docker_image, command, environment, input_data, \
     required_cpu, required_memory, required_gpu, redundancy, consensus, status, \
     submitted_by, submitted_at, started_at, completed_at, result, error_message, credits_required";

const NODE_COLUMNS: &str = "id, name, region, cpu_cores, memory_gb, gpu_enabled, gpu_model, status, \
     reputation_score, total_jobs_run, successful_jobs_run, failed_jobs, credits_earned, \
     last_heartbeat, registered_at";

const EXECUTION_COLUMNS: &str =
    "id, job_id, node_id, status, started_at, completed_at, result, result_hash, error_message, logs";

// The command and environment columns hold JSON, so the row mapping is
// written out by hand instead of derived.
impl<'r> FromRow<'r, SqliteRow> for Job {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        let command: String = row.try_get("command")?;
        let environment: String = row.try_get("environment")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            docker_image: row.try_get("docker_image")?,
            command: serde_json::from_str(&command).map_err(|e| sqlx::Error::ColumnDecode {
                index: "command".into(),
                source: Box::new(e),
            })?,
            environment: serde_json::from_str(&environment).map_err(|e| {
                sqlx::Error::ColumnDecode {
                    index: "environment".into(),
                    source: Box::new(e),
                }
            })?,
            input_data: row.try_get("input_data")?,
            required_cpu: row.try_get("required_cpu")?,
            required_memory: row.try_get("required_memory")?,
            required_gpu: row.try_get("required_gpu")?,
            redundancy: row.try_get("redundancy")?,
            consensus: row.try_get("consensus")?,
            status: row.try_get("status")?,
            submitted_by: row.try_get("submitted_by")?,
            submitted_at: row.try_get("submitted_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            result: row.try_get("result")?,
            error_message: row.try_get("error_message")?,
            credits_required: row.try_get("credits_required")?,
        })
    }
}

/// Durable repository of jobs, nodes and executions.
///
/// Every operation is a single SQL statement; counter and reputation updates
/// use in-database arithmetic so concurrent callers cannot lose increments.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database behind `database_url` and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(QuorumError::Database)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory database, used by tests. A single connection keeps every
    /// query on the same ephemeral database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    // Job operations

    pub async fn create_job(&self, job: &Job) -> Result<()> {
        let command = serde_json::to_string(&job.command)?;
        let environment = serde_json::to_string(&job.environment)?;
        sqlx::query(
            "INSERT INTO jobs (id, name, description, docker_image, command, environment, \
             input_data, required_cpu, required_memory, required_gpu, redundancy, consensus, \
             status, submitted_by, submitted_at, credits_required) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.description)
        .bind(&job.docker_image)
        .bind(command)
        .bind(environment)
        .bind(&job.input_data)
        .bind(job.required_cpu)
        .bind(job.required_memory)
        .bind(job.required_gpu)
        .bind(job.redundancy)
        .bind(job.consensus)
        .bind(job.status)
        .bind(&job.submitted_by)
        .bind(job.submitted_at)
        .bind(job.credits_required)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> Result<Job> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| QuorumError::JobNotFound(id.to_string()))
    }

    /// The most recent jobs, newest first.
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY submitted_at DESC LIMIT ?");
        Ok(sqlx::query_as::<_, Job>(&query)
            .bind(LIST_JOBS_LIMIT)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Pending jobs, oldest first (FIFO).
    pub async fn list_pending_jobs(&self) -> Result<Vec<Job>> {
        let query =
            format!("SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? ORDER BY submitted_at ASC");
        Ok(sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Pending)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Jobs that have not reached a terminal state, oldest first.
    pub async fn list_active_jobs(&self) -> Result<Vec<Job>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status NOT IN (?, ?) ORDER BY submitted_at ASC"
        );
        Ok(sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Completed)
            .bind(JobStatus::Failed)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn update_job_status(
        &self,
        id: &str,
        status: JobStatus,
        result: &str,
        error_message: &str,
    ) -> Result<()> {
        if status.is_terminal() {
            sqlx::query(
                "UPDATE jobs SET status = ?, result = ?, error_message = ?, completed_at = ? \
                 WHERE id = ?",
            )
            .bind(status)
            .bind(result)
            .bind(error_message)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query("UPDATE jobs SET status = ?, error_message = ? WHERE id = ?")
                .bind(status)
                .bind(error_message)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Compare-and-set a terminal status: only applies when the job is still
    /// active. Returns whether the transition happened. This is the guard
    /// that keeps finalization (and the reputation deltas hanging off it)
    /// from running twice.
    pub async fn finalize_job_if_active(
        &self,
        id: &str,
        status: JobStatus,
        result: &str,
        error_message: &str,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE jobs SET status = ?, result = ?, error_message = ?, completed_at = ? \
             WHERE id = ? AND status NOT IN (?, ?)",
        )
        .bind(status)
        .bind(result)
        .bind(error_message)
        .bind(Utc::now())
        .bind(id)
        .bind(JobStatus::Completed)
        .bind(JobStatus::Failed)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    // Node operations

    /// Insert-or-update keyed on the node id. Capability fields, status and
    /// the heartbeat refresh; reputation, counters and `registered_at`
    /// survive re-registration.
    pub async fn register_node(&self, node: &Node) -> Result<()> {
        sqlx::query(
            "INSERT INTO nodes (id, name, region, cpu_cores, memory_gb, gpu_enabled, gpu_model, \
             status, reputation_score, last_heartbeat, registered_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                name = excluded.name, \
                region = excluded.region, \
                cpu_cores = excluded.cpu_cores, \
                memory_gb = excluded.memory_gb, \
                gpu_enabled = excluded.gpu_enabled, \
                gpu_model = excluded.gpu_model, \
                status = excluded.status, \
                last_heartbeat = excluded.last_heartbeat",
        )
        .bind(&node.id)
        .bind(&node.name)
        .bind(&node.region)
        .bind(node.cpu_cores)
        .bind(node.memory_gb)
        .bind(node.gpu_enabled)
        .bind(&node.gpu_model)
        .bind(node.status)
        .bind(node.reputation_score)
        .bind(node.last_heartbeat)
        .bind(node.registered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_node(&self, id: &str) -> Result<Node> {
        let query = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?");
        sqlx::query_as::<_, Node>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| QuorumError::NodeNotFound(id.to_string()))
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let query = format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY registered_at DESC");
        Ok(sqlx::query_as::<_, Node>(&query)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Online nodes that satisfy the job's resource requirements, most
    /// trusted and least loaded first.
    pub async fn list_available_nodes(
        &self,
        required_cpu: i64,
        required_memory: i64,
        required_gpu: bool,
    ) -> Result<Vec<Node>> {
        let query = format!(
            "SELECT {NODE_COLUMNS} FROM nodes \
             WHERE status = ? AND cpu_cores >= ? AND memory_gb >= ? \
               AND (? = 0 OR gpu_enabled = 1) \
             ORDER BY reputation_score DESC, total_jobs_run ASC"
        );
        Ok(sqlx::query_as::<_, Node>(&query)
            .bind(NodeStatus::Online)
            .bind(required_cpu)
            .bind(required_memory)
            .bind(required_gpu)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Record a heartbeat. The node comes (back) Online; this is also the
    /// recovery path for a Busy node whose job was reclaimed.
    pub async fn update_node_heartbeat(&self, id: &str, timestamp: DateTime<Utc>) -> Result<()> {
        let updated = sqlx::query("UPDATE nodes SET last_heartbeat = ?, status = ? WHERE id = ?")
            .bind(timestamp)
            .bind(NodeStatus::Online)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(QuorumError::NodeNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn update_node_status(&self, id: &str, status: NodeStatus) -> Result<()> {
        sqlx::query("UPDATE nodes SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Atomically add `delta` to the node's reputation, clamping at zero.
    pub async fn update_node_reputation(&self, id: &str, delta: f64) -> Result<()> {
        sqlx::query("UPDATE nodes SET reputation_score = MAX(0, reputation_score + ?) WHERE id = ?")
            .bind(delta)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bump the per-node job counters after a verification pass.
    pub async fn increment_node_stats(
        &self,
        id: &str,
        success: bool,
        credits_earned: i64,
    ) -> Result<()> {
        if success {
            sqlx::query(
                "UPDATE nodes SET \
                    total_jobs_run = total_jobs_run + 1, \
                    successful_jobs_run = successful_jobs_run + 1, \
                    credits_earned = credits_earned + ? \
                 WHERE id = ?",
            )
            .bind(credits_earned)
            .bind(id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE nodes SET \
                    total_jobs_run = total_jobs_run + 1, \
                    failed_jobs = failed_jobs + 1 \
                 WHERE id = ?",
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    // Execution operations

    pub async fn create_job_execution(&self, execution: &JobExecution) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_executions (id, job_id, node_id, status, started_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&execution.id)
        .bind(&execution.job_id)
        .bind(&execution.node_id)
        .bind(execution.status)
        .bind(execution.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Overwrite the mutable portion of an execution row (last writer wins).
    pub async fn update_job_execution(&self, execution: &JobExecution) -> Result<()> {
        sqlx::query(
            "UPDATE job_executions \
             SET status = ?, completed_at = ?, result = ?, result_hash = ?, \
                 error_message = ?, logs = ? \
             WHERE id = ?",
        )
        .bind(execution.status)
        .bind(execution.completed_at)
        .bind(&execution.result)
        .bind(&execution.result_hash)
        .bind(&execution.error_message)
        .bind(&execution.logs)
        .bind(&execution.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_job_executions(&self, job_id: &str) -> Result<Vec<JobExecution>> {
        let query = format!("SELECT {EXECUTION_COLUMNS} FROM job_executions WHERE job_id = ?");
        Ok(sqlx::query_as::<_, JobExecution>(&query)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Executions waiting to be picked up by one node.
    pub async fn list_scheduled_executions(&self, node_id: &str) -> Result<Vec<JobExecution>> {
        let query = format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions WHERE node_id = ? AND status = ?"
        );
        Ok(sqlx::query_as::<_, JobExecution>(&query)
            .bind(node_id)
            .bind(ExecutionStatus::Scheduled)
            .fetch_all(&self.pool)
            .await?)
    }
}
