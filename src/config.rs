use std::time::Duration;

use uuid::Uuid;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_or_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => v == "true" || v == "1",
        Err(_) => default,
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub database_url: String,
    pub port: u16,
}

impl CoordinatorConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env_or("DATABASE_URL", "sqlite:quorumd.db?mode=rwc"),
            port: env_or_parse("COORDINATOR_PORT", 8080),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:quorumd.db?mode=rwc".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub coordinator_url: String,
    pub worker_id: String,
    pub worker_name: String,
    pub region: String,
    pub cpu_cores: i64,
    pub memory_gb: i64,
    pub gpu_enabled: bool,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self {
            coordinator_url: env_or("COORDINATOR_URL", "http://localhost:8080"),
            worker_id: env_or("WORKER_ID", &default_worker_id()),
            worker_name: env_or("WORKER_NAME", "Worker Node"),
            region: env_or("WORKER_REGION", "unknown"),
            cpu_cores: env_or_parse("CPU_CORES", 4),
            memory_gb: env_or_parse("MEMORY_GB", 8),
            gpu_enabled: env_or_bool("GPU_ENABLED", false),
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://localhost:8080".to_string(),
            worker_id: default_worker_id(),
            worker_name: "Worker Node".to_string(),
            region: "unknown".to_string(),
            cpu_cores: 4,
            memory_gb: 8,
            gpu_enabled: false,
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(10),
        }
    }
}

fn default_worker_id() -> String {
    match std::env::var("HOSTNAME") {
        Ok(host) if !host.is_empty() => format!("worker-{host}"),
        _ => format!("worker-{}", Uuid::new_v4()),
    }
}
