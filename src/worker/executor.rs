use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::models::Job;

/// Default wall-clock limit for one container run.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Container memory limit handed to docker.
const MEMORY_LIMIT: &str = "512m";
/// Container CPU limit handed to docker.
const CPU_LIMIT: &str = "1";

/// What one execution attempt produced.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub output: String,
    pub output_hash: String,
    pub logs: String,
    pub error: Option<String>,
    pub success: bool,
}

impl ExecutionOutcome {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            output_hash: String::new(),
            logs: String::new(),
            error: Some(error.into()),
            success: false,
        }
    }
}

/// The contract a worker fulfills: run the job's image/command/env with its
/// input and report output, output hash and logs. The coordinator never
/// trusts a single outcome; redundancy does the verifying.
#[async_trait]
pub trait Executor {
    async fn execute(&self, job: &Job) -> ExecutionOutcome;
}

/// Lowercase hex SHA-256 over the canonical output bytes. Two workers
/// producing byte-identical output produce identical hashes.
pub fn hash_output(output: &[u8]) -> String {
    format!("{:x}", Sha256::digest(output))
}

/// Runs jobs in Docker containers via the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerExecutor {
    timeout: Duration,
}

impl DockerExecutor {
    pub fn new() -> Self {
        Self {
            timeout: EXECUTION_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn pull_image(&self, image: &str) -> Result<(), String> {
        tracing::info!(image, "Pulling Docker image");
        let output = Command::new("docker")
            .args(["pull", image])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| format!("failed to run docker pull: {e}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("failed to pull image {image}: {}", stderr.trim()));
        }
        Ok(())
    }

    async fn run_container(&self, job: &Job) -> ExecutionOutcome {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            format!("--memory={MEMORY_LIMIT}"),
            format!("--cpus={CPU_LIMIT}"),
        ];
        for (key, value) in &job.environment {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(job.docker_image.clone());
        args.extend(job.command.iter().cloned());

        let mut command = Command::new("docker");
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return ExecutionOutcome::failure(format!("failed to start container: {e}")),
        };

        // Input data arrives on the container's stdin.
        if let Some(mut stdin) = child.stdin.take() {
            if !job.input_data.is_empty() {
                if let Err(e) = stdin.write_all(job.input_data.as_bytes()).await {
                    tracing::warn!(error = %e, "Failed to write input data");
                }
            }
            drop(stdin);
        }

        // kill_on_drop reaps the container if the timeout wins the race.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ExecutionOutcome::failure(format!("container wait error: {e}"));
            }
            Err(_) => {
                return ExecutionOutcome::failure(format!(
                    "execution timeout ({} seconds)",
                    self.timeout.as_secs()
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let logs = if stderr.is_empty() {
            stdout.clone()
        } else {
            format!("{stdout}{stderr}")
        };

        if output.status.success() {
            ExecutionOutcome {
                output_hash: hash_output(stdout.as_bytes()),
                output: stdout,
                logs,
                error: None,
                success: true,
            }
        } else {
            ExecutionOutcome {
                output: String::new(),
                output_hash: String::new(),
                logs,
                error: Some(format!(
                    "container exited with code {:?}",
                    output.status.code()
                )),
                success: false,
            }
        }
    }
}

impl Default for DockerExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    async fn execute(&self, job: &Job) -> ExecutionOutcome {
        tracing::info!(
            job_id = %job.id,
            image = %job.docker_image,
            command = ?job.command,
            "Executing job"
        );

        if let Err(e) = self.pull_image(&job.docker_image).await {
            return ExecutionOutcome::failure(e);
        }

        let outcome = self.run_container(job).await;

        match &outcome.error {
            None => {
                tracing::info!(job_id = %job.id, hash = %outcome.output_hash, "Job completed")
            }
            Some(error) => tracing::error!(job_id = %job.id, error, "Job failed"),
        }

        outcome
    }
}
