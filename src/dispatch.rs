use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{QuorumError, Result};
use crate::models::{
    ExecutionStatus, HeartbeatRequest, Job, JobResultSubmission, Node, NodeRegisterRequest,
    NodeStatus,
};
use crate::store::Store;

/// An execution handed to a worker, paired with the job it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignedJob {
    pub execution_id: String,
    pub job: Job,
}

/// The contract by which workers learn of assigned executions and return
/// results. The transport in front of it (polling HTTP here, but push works
/// just as well) only moves these four calls across the wire.
#[async_trait]
pub trait Dispatch {
    /// Idempotent on the node id; counters survive re-registration.
    async fn register_node(&self, req: NodeRegisterRequest) -> Result<Node>;

    /// Refresh the node's liveness; brings an Offline node back Online.
    async fn heartbeat(&self, node_id: &str, heartbeat: HeartbeatRequest) -> Result<()>;

    /// All executions currently Scheduled for this node.
    async fn fetch_assigned(&self, node_id: &str) -> Result<Vec<AssignedJob>>;

    /// Record a worker's result. Last writer wins on the execution row.
    async fn submit_result(&self, submission: JobResultSubmission) -> Result<()>;
}

/// Store-backed dispatch used by the coordinator.
#[derive(Clone)]
pub struct DispatchService {
    store: Store,
}

impl DispatchService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Dispatch for DispatchService {
    async fn register_node(&self, req: NodeRegisterRequest) -> Result<Node> {
        let node = Node::from_request(req);
        self.store.register_node(&node).await?;
        // Read the row back: for a re-registration the stored counters and
        // reputation differ from the freshly-built struct.
        let stored = self.store.get_node(&node.id).await?;
        tracing::info!(node_id = %stored.id, name = %stored.name, "Node registered");
        Ok(stored)
    }

    async fn heartbeat(&self, node_id: &str, heartbeat: HeartbeatRequest) -> Result<()> {
        self.store
            .update_node_heartbeat(node_id, Utc::now())
            .await?;
        tracing::debug!(
            node_id,
            cpu_usage = heartbeat.cpu_usage,
            memory_usage = heartbeat.memory_usage,
            active_jobs = heartbeat.active_jobs,
            "Heartbeat received"
        );
        Ok(())
    }

    async fn fetch_assigned(&self, node_id: &str) -> Result<Vec<AssignedJob>> {
        let executions = self.store.list_scheduled_executions(node_id).await?;

        let mut assigned = Vec::with_capacity(executions.len());
        for execution in executions {
            match self.store.get_job(&execution.job_id).await {
                Ok(job) => assigned.push(AssignedJob {
                    execution_id: execution.id,
                    job,
                }),
                Err(e) => {
                    tracing::warn!(execution_id = %execution.id, error = %e,
                        "Skipping execution with missing job");
                }
            }
        }

        Ok(assigned)
    }

    async fn submit_result(&self, submission: JobResultSubmission) -> Result<()> {
        let executions = self.store.list_job_executions(&submission.job_id).await?;
        let mut execution = executions
            .into_iter()
            .find(|e| e.id == submission.execution_id)
            .ok_or_else(|| QuorumError::ExecutionNotFound(submission.execution_id.clone()))?;

        execution.completed_at = Some(Utc::now());
        execution.result = submission.result;
        execution.result_hash = submission.result_hash;
        execution.error_message = submission.error_message;
        execution.logs = submission.logs;
        execution.status = if execution.error_message.is_empty() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };

        self.store.update_job_execution(&execution).await?;

        // The node is free again.
        if let Err(e) = self
            .store
            .update_node_status(&submission.node_id, NodeStatus::Online)
            .await
        {
            tracing::warn!(node_id = %submission.node_id, error = %e,
                "Failed to mark node online");
        }

        tracing::info!(
            execution_id = %execution.id,
            job_id = %execution.job_id,
            node_id = %submission.node_id,
            status = %execution.status,
            "Result submitted"
        );

        Ok(())
    }
}
