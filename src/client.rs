use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::AssignedJob;
use crate::error::Result;
use crate::models::{
    HeartbeatRequest, Job, JobResultSubmission, JobSubmitRequest, Node, NodeRegisterRequest,
};

/// HTTP client for the coordinator API, shared by the worker and the
/// operator CLI.
#[derive(Clone)]
pub struct CoordinatorClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
pub struct JobList {
    pub jobs: Vec<Job>,
    pub count: usize,
}

#[derive(Deserialize)]
pub struct NodeList {
    pub nodes: Vec<Node>,
    pub count: usize,
}

#[derive(Deserialize)]
struct PendingJobsResponse {
    pending_jobs: Vec<AssignedJob>,
}

impl CoordinatorClient {
    pub fn new(base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    pub async fn register_node(&self, req: &NodeRegisterRequest) -> Result<Node> {
        let node = self
            .http
            .post(format!("{}/api/v1/nodes/register", self.base_url))
            .json(req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(node)
    }

    pub async fn send_heartbeat(&self, node_id: &str, heartbeat: &HeartbeatRequest) -> Result<()> {
        self.http
            .post(format!(
                "{}/api/v1/nodes/{}/heartbeat",
                self.base_url, node_id
            ))
            .json(heartbeat)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn fetch_assigned(&self, node_id: &str) -> Result<Vec<AssignedJob>> {
        let response: PendingJobsResponse = self
            .http
            .get(format!(
                "{}/api/v1/nodes/{}/pending-jobs",
                self.base_url, node_id
            ))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.pending_jobs)
    }

    pub async fn submit_result(&self, submission: &JobResultSubmission) -> Result<()> {
        self.http
            .post(format!("{}/api/v1/worker/result", self.base_url))
            .json(submission)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    // Operator calls

    pub async fn submit_job(&self, req: &JobSubmitRequest) -> Result<Job> {
        let job = self
            .http
            .post(format!("{}/api/v1/jobs", self.base_url))
            .json(req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(job)
    }

    pub async fn get_job(&self, id: &str) -> Result<Job> {
        let job = self
            .http
            .get(format!("{}/api/v1/jobs/{}", self.base_url, id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(job)
    }

    pub async fn list_jobs(&self) -> Result<JobList> {
        let jobs = self
            .http
            .get(format!("{}/api/v1/jobs", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(jobs)
    }

    pub async fn list_nodes(&self) -> Result<NodeList> {
        let nodes = self
            .http
            .get(format!("{}/api/v1/nodes", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(nodes)
    }

    pub async fn stats(&self) -> Result<serde_json::Value> {
        let stats = self
            .http
            .get(format!("{}/stats", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(stats)
    }
}
