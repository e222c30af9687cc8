pub mod executor;
pub mod monitor;

use std::sync::atomic::{AtomicI64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::client::CoordinatorClient;
use crate::config::WorkerConfig;
use crate::dispatch::AssignedJob;
use crate::error::Result;
use crate::models::{HeartbeatRequest, JobResultSubmission, NodeRegisterRequest};
use self::executor::{DockerExecutor, Executor};
use self::monitor::SystemMonitor;

/// A worker process: registers with the coordinator, heartbeats, polls for
/// assigned executions and runs them.
pub struct Worker<E: Executor> {
    config: WorkerConfig,
    client: CoordinatorClient,
    executor: E,
    monitor: SystemMonitor,
    active_jobs: AtomicI64,
}

impl Worker<DockerExecutor> {
    pub fn new(config: WorkerConfig) -> Self {
        let client = CoordinatorClient::new(&config.coordinator_url);
        let monitor = SystemMonitor::new(config.cpu_cores, config.memory_gb);
        Self {
            config,
            client,
            executor: DockerExecutor::new(),
            monitor,
            active_jobs: AtomicI64::new(0),
        }
    }
}

impl<E: Executor> Worker<E> {
    pub fn with_executor(config: WorkerConfig, executor: E) -> Self {
        let client = CoordinatorClient::new(&config.coordinator_url);
        let monitor = SystemMonitor::new(config.cpu_cores, config.memory_gb);
        Self {
            config,
            client,
            executor,
            monitor,
            active_jobs: AtomicI64::new(0),
        }
    }

    /// Register, then drive the heartbeat and polling loops until the
    /// shutdown token fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.register().await?;

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        let mut poll = tokio::time::interval(self.config.poll_interval);
        // The first tick of each interval fires immediately; skip straight
        // past the duplicate registration-time heartbeat.
        heartbeat.tick().await;
        poll.tick().await;

        tracing::info!(worker_id = %self.config.worker_id, "Worker started");

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    self.send_heartbeat().await;
                }
                _ = poll.tick() => {
                    self.poll_and_execute().await;
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Worker stopped");
                    return Ok(());
                }
            }
        }
    }

    async fn register(&self) -> Result<()> {
        tracing::info!(worker_id = %self.config.worker_id, "Registering with coordinator");

        let req = NodeRegisterRequest {
            id: self.config.worker_id.clone(),
            name: self.config.worker_name.clone(),
            region: self.config.region.clone(),
            cpu_cores: self.config.cpu_cores,
            memory_gb: self.config.memory_gb,
            gpu_enabled: self.config.gpu_enabled,
            gpu_model: String::new(),
        };

        self.client.register_node(&req).await?;
        tracing::info!("Worker registered");
        Ok(())
    }

    async fn send_heartbeat(&self) {
        let active_jobs = self.active_jobs.load(Ordering::Relaxed);
        let heartbeat = HeartbeatRequest {
            cpu_usage: self.monitor.cpu_usage(active_jobs),
            memory_usage: self.monitor.memory_usage(),
            active_jobs,
        };

        match self
            .client
            .send_heartbeat(&self.config.worker_id, &heartbeat)
            .await
        {
            Ok(()) => tracing::debug!("Heartbeat sent"),
            Err(e) => tracing::warn!(error = %e, "Failed to send heartbeat"),
        }
    }

    async fn poll_and_execute(&self) {
        let assigned = match self.client.fetch_assigned(&self.config.worker_id).await {
            Ok(assigned) => assigned,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch assigned jobs");
                return;
            }
        };

        if assigned.is_empty() {
            return;
        }

        tracing::info!(count = assigned.len(), "Received assigned job(s)");
        for assignment in assigned {
            self.execute_assignment(assignment).await;
        }
    }

    async fn execute_assignment(&self, assignment: AssignedJob) {
        let job = assignment.job;
        tracing::info!(job_id = %job.id, name = %job.name, "Executing assignment");

        self.active_jobs.fetch_add(1, Ordering::Relaxed);
        let outcome = self.executor.execute(&job).await;
        self.active_jobs.fetch_sub(1, Ordering::Relaxed);

        let submission = JobResultSubmission {
            execution_id: assignment.execution_id,
            job_id: job.id.clone(),
            node_id: self.config.worker_id.clone(),
            result: if outcome.success {
                outcome.output
            } else {
                String::new()
            },
            result_hash: if outcome.success {
                outcome.output_hash
            } else {
                String::new()
            },
            error_message: outcome.error.unwrap_or_default(),
            logs: outcome.logs,
        };

        match self.client.submit_result(&submission).await {
            Ok(()) => tracing::info!(job_id = %job.id, "Result submitted"),
            Err(e) => tracing::error!(job_id = %job.id, error = %e, "Failed to submit result"),
        }
    }
}
