use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{ExecutionStatus, Job, JobExecution, JobStatus, NodeStatus};
use crate::store::Store;
use crate::verifier::Verifier;

/// Time between scheduler passes.
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);
/// Heartbeat silence after which an Online node is marked Offline.
pub const STALE_NODE_SECS: i64 = 120;
/// Age after which a Scheduled job with no progress is reset to Pending.
pub const STUCK_JOB_SECS: i64 = 600;
/// Reputation delta for going offline.
pub const OFFLINE_PENALTY: f64 = -20.0;

/// The coordinator's periodic control loop.
///
/// Each pass runs three phases in order: assign pending jobs to nodes,
/// advance running jobs (verification, failure detection, stuck-job
/// reclaim), and evict stale nodes. A failure in one phase is logged and
/// does not stop the others.
pub struct Scheduler {
    store: Store,
    verifier: Verifier,
}

impl Scheduler {
    pub fn new(store: Store, verifier: Verifier) -> Self {
        Self { store, verifier }
    }

    /// Drive the loop until the shutdown token fires. The current pass
    /// always finishes before the loop exits.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!("Scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.schedule_pending_jobs().await;
                    self.advance_running_jobs().await;
                    self.detect_stale_nodes().await;
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler stopped");
                    return;
                }
            }
        }
    }

    /// Phase A: assign each pending job to its N nodes, FIFO.
    pub async fn schedule_pending_jobs(&self) {
        let jobs = match self.store.list_pending_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list pending jobs");
                return;
            }
        };

        for job in jobs {
            if let Err(e) = self.schedule_job(&job).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to schedule job");
            }
        }
    }

    async fn schedule_job(&self, job: &Job) -> Result<()> {
        let nodes = self
            .store
            .list_available_nodes(job.required_cpu, job.required_memory, job.required_gpu)
            .await?;

        if (nodes.len() as i64) < job.redundancy {
            // Capacity wait, not an error. The job stays pending.
            tracing::warn!(
                job_id = %job.id,
                need = job.redundancy,
                have = nodes.len(),
                "Not enough nodes available"
            );
            return Ok(());
        }

        let selected = &nodes[..job.redundancy as usize];
        tracing::info!(job_id = %job.id, nodes = selected.len(), "Scheduling job");

        for node in selected {
            let execution = JobExecution::new(&job.id, &node.id);
            if let Err(e) = self.store.create_job_execution(&execution).await {
                // No rollback: the next pass sees the partial state through
                // the stuck-job check.
                tracing::error!(job_id = %job.id, node_id = %node.id, error = %e,
                    "Failed to create execution");
                continue;
            }
            if let Err(e) = self.store.update_node_status(&node.id, NodeStatus::Busy).await {
                tracing::warn!(node_id = %node.id, error = %e, "Failed to mark node busy");
            }
        }

        self.store
            .update_job_status(&job.id, JobStatus::Scheduled, "", "")
            .await?;

        Ok(())
    }

    /// Phase B: verify, fail or reclaim every non-terminal job.
    pub async fn advance_running_jobs(&self) {
        let jobs = match self.store.list_active_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list active jobs");
                return;
            }
        };

        for job in jobs {
            if let Err(e) = self.advance_job(&job).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to advance job");
            }
        }
    }

    async fn advance_job(&self, job: &Job) -> Result<()> {
        let executions = self.store.list_job_executions(&job.id).await?;

        let completed = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Completed)
            .count() as i64;
        let failed = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Failed)
            .count() as i64;

        if completed >= job.consensus {
            let result = self.verifier.check_and_finalize(&job.id).await?;
            if !result.consensus_reached && completed == job.redundancy {
                // Every execution reported and no k hashes agree; more votes
                // cannot arrive, so the job can never converge.
                tracing::warn!(job_id = %job.id, "All executions completed without consensus");
                self.store
                    .finalize_job_if_active(&job.id, JobStatus::Failed, "", "No consensus")
                    .await?;
                return Ok(());
            }
        }

        if failed > job.redundancy - job.consensus {
            tracing::warn!(job_id = %job.id, failed, "Too many execution failures");
            self.store
                .finalize_job_if_active(&job.id, JobStatus::Failed, "", "Too many execution failures")
                .await?;
            return Ok(());
        }

        // A scheduled job whose workers vanished before starting goes back
        // to the pending queue.
        if job.status == JobStatus::Scheduled
            && (Utc::now() - job.submitted_at).num_seconds() > STUCK_JOB_SECS
        {
            let has_running = executions
                .iter()
                .any(|e| e.status == ExecutionStatus::Running);
            if !has_running && completed == 0 {
                tracing::warn!(job_id = %job.id, "Job appears stuck, rescheduling");
                self.store
                    .update_job_status(&job.id, JobStatus::Pending, "", "")
                    .await?;
            }
        }

        Ok(())
    }

    /// Phase C: nodes silent past the stale threshold go Offline and lose
    /// reputation. Busy nodes are presumed mid-job and left alone; their
    /// jobs time out through Phase B.
    pub async fn detect_stale_nodes(&self) {
        let nodes = match self.store.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list nodes");
                return;
            }
        };

        let now = Utc::now();
        for node in nodes {
            if node.status != NodeStatus::Online {
                continue;
            }
            if (now - node.last_heartbeat).num_seconds() <= STALE_NODE_SECS {
                continue;
            }

            tracing::warn!(node_id = %node.id, "Node is stale, marking offline");
            if let Err(e) = self
                .store
                .update_node_status(&node.id, NodeStatus::Offline)
                .await
            {
                tracing::error!(node_id = %node.id, error = %e, "Failed to mark node offline");
                continue;
            }
            if let Err(e) = self
                .store
                .update_node_reputation(&node.id, OFFLINE_PENALTY)
                .await
            {
                tracing::warn!(node_id = %node.id, error = %e, "Failed to apply offline penalty");
            }
        }
    }
}
