use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quorumd::cli::{self, SubmitArgs};
use quorumd::config::{CoordinatorConfig, WorkerConfig};
use quorumd::coordinator;
use quorumd::shutdown::install_shutdown_handler;
use quorumd::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "quorumd")]
#[command(about = "Decentralized compute platform with k-of-n result verification")]
struct Args {
    /// Coordinator API URL (operator commands)
    #[arg(long, global = true, default_value = "http://localhost:8080")]
    coordinator: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the coordinator: HTTP API plus the scheduling loop
    Coordinator,
    /// Run a worker node
    Worker,
    /// Submit a job
    Submit {
        /// Job name
        #[arg(long)]
        name: String,
        /// Job description
        #[arg(long, default_value = "")]
        description: String,
        /// Docker image to run
        #[arg(long)]
        image: String,
        /// Command argument (repeat the flag for each argument)
        #[arg(long = "cmd", required = true)]
        command: Vec<String>,
        /// Environment variable as KEY=VALUE (repeatable)
        #[arg(long = "env")]
        env: Vec<String>,
        /// Input data passed to the container on stdin
        #[arg(long, default_value = "")]
        input: String,
        /// Required CPU cores
        #[arg(long, default_value_t = 1)]
        cpu: i64,
        /// Required memory in GB
        #[arg(long, default_value_t = 1)]
        memory: i64,
        /// Require a GPU-enabled node
        #[arg(long)]
        gpu: bool,
    },
    /// List recent jobs
    Jobs,
    /// Show one job
    Job { id: String },
    /// List worker nodes
    Nodes,
    /// Show platform statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Coordinator => {
            let config = CoordinatorConfig::from_env();
            let shutdown = install_shutdown_handler();
            tracing::info!(port = config.port, "Starting coordinator");
            coordinator::run(config, shutdown).await?;
        }
        Command::Worker => {
            let config = WorkerConfig::from_env();
            let shutdown = install_shutdown_handler();
            tracing::info!(worker_id = %config.worker_id, "Starting worker");
            Worker::new(config).run(shutdown).await?;
        }
        Command::Submit {
            name,
            description,
            image,
            command,
            env,
            input,
            cpu,
            memory,
            gpu,
        } => {
            cli::submit(
                &args.coordinator,
                SubmitArgs {
                    name,
                    description,
                    image,
                    command,
                    env,
                    input,
                    cpu,
                    memory,
                    gpu,
                },
            )
            .await?;
        }
        Command::Jobs => cli::list_jobs(&args.coordinator).await?,
        Command::Job { id } => cli::get_job(&args.coordinator, &id).await?,
        Command::Nodes => cli::list_nodes(&args.coordinator).await?,
        Command::Stats => cli::stats(&args.coordinator).await?,
    }

    Ok(())
}
