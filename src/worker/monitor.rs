/// Coarse system usage sampler reported in heartbeats.
///
/// The numbers are informational only; the coordinator makes no decisions
/// on them. Memory comes from /proc/meminfo when available, CPU is
/// approximated from the number of jobs in flight.
#[derive(Debug, Clone)]
pub struct SystemMonitor {
    cpu_cores: i64,
    memory_gb: i64,
}

impl SystemMonitor {
    pub fn new(cpu_cores: i64, memory_gb: i64) -> Self {
        Self {
            cpu_cores: cpu_cores.max(1),
            memory_gb: memory_gb.max(1),
        }
    }

    /// Estimated CPU usage percentage given the jobs currently running.
    pub fn cpu_usage(&self, active_jobs: i64) -> f64 {
        (active_jobs as f64 / self.cpu_cores as f64 * 100.0).min(100.0)
    }

    /// Memory usage percentage from /proc/meminfo, or 0.0 where that is
    /// unavailable.
    pub fn memory_usage(&self) -> f64 {
        let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") else {
            return 0.0;
        };

        let mut total_kb = 0.0;
        let mut available_kb = 0.0;
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                total_kb = parse_kb(rest);
            } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
                available_kb = parse_kb(rest);
            }
        }

        if total_kb <= 0.0 {
            return 0.0;
        }
        ((total_kb - available_kb) / total_kb * 100.0).clamp(0.0, 100.0)
    }

    pub fn memory_gb(&self) -> i64 {
        self.memory_gb
    }
}

fn parse_kb(s: &str) -> f64 {
    s.trim()
        .trim_end_matches(" kB")
        .trim()
        .parse()
        .unwrap_or(0.0)
}
