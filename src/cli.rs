use std::collections::HashMap;

use crate::client::CoordinatorClient;
use crate::error::{QuorumError, Result};
use crate::models::JobSubmitRequest;

/// Flags for the `submit` subcommand, already parsed by clap.
pub struct SubmitArgs {
    pub name: String,
    pub description: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<String>,
    pub input: String,
    pub cpu: i64,
    pub memory: i64,
    pub gpu: bool,
}

pub async fn submit(coordinator_url: &str, args: SubmitArgs) -> Result<()> {
    let mut environment = HashMap::new();
    for pair in &args.env {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            QuorumError::InvalidRequest(format!("invalid --env '{pair}', expected KEY=VALUE"))
        })?;
        environment.insert(key.to_string(), value.to_string());
    }

    let req = JobSubmitRequest {
        name: args.name,
        description: args.description,
        docker_image: args.image,
        command: args.command,
        environment,
        input_data: args.input,
        required_cpu: args.cpu,
        required_memory: args.memory,
        required_gpu: args.gpu,
    };

    let client = CoordinatorClient::new(coordinator_url);
    let job = client.submit_job(&req).await?;

    println!("Job submitted");
    println!("  id:     {}", job.id);
    println!("  name:   {}", job.name);
    println!("  status: {}", job.status);
    println!();
    println!("Monitor progress with: quorumd job {}", job.id);
    Ok(())
}

pub async fn list_jobs(coordinator_url: &str) -> Result<()> {
    let client = CoordinatorClient::new(coordinator_url);
    let list = client.list_jobs().await?;

    println!("{} job(s)", list.count);
    for job in &list.jobs {
        println!(
            "  {}  {:<10}  {}  (n={} k={})",
            job.id,
            job.status.to_string(),
            job.name,
            job.redundancy,
            job.consensus
        );
    }
    Ok(())
}

pub async fn get_job(coordinator_url: &str, id: &str) -> Result<()> {
    let client = CoordinatorClient::new(coordinator_url);
    let job = client.get_job(id).await?;

    println!("Job {}", job.id);
    println!("  name:        {}", job.name);
    println!("  image:       {}", job.docker_image);
    println!("  command:     {}", job.command.join(" "));
    println!("  status:      {}", job.status);
    println!("  redundancy:  {} (consensus {})", job.redundancy, job.consensus);
    println!("  submitted:   {}", job.submitted_at.to_rfc3339());
    if let Some(completed_at) = job.completed_at {
        println!("  completed:   {}", completed_at.to_rfc3339());
    }
    if !job.result.is_empty() {
        println!("  result:      {}", job.result.trim_end());
    }
    if !job.error_message.is_empty() {
        println!("  error:       {}", job.error_message);
    }
    Ok(())
}

pub async fn list_nodes(coordinator_url: &str) -> Result<()> {
    let client = CoordinatorClient::new(coordinator_url);
    let list = client.list_nodes().await?;

    println!("{} node(s)", list.count);
    for node in &list.nodes {
        println!(
            "  {}  {:<8}  rep {:>6.1}  {} cpu / {} GB{}  jobs {} ({} ok, {} failed)",
            node.id,
            node.status.to_string(),
            node.reputation_score,
            node.cpu_cores,
            node.memory_gb,
            if node.gpu_enabled { " / gpu" } else { "" },
            node.total_jobs_run,
            node.successful_jobs_run,
            node.failed_jobs,
        );
    }
    Ok(())
}

pub async fn stats(coordinator_url: &str) -> Result<()> {
    let client = CoordinatorClient::new(coordinator_url);
    let stats = client.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
