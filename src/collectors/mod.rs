pub mod dynamic;
#[cfg(test)]
pub mod fake;
pub mod host;
pub mod local_ip;
pub mod network;
pub mod probes;
pub mod static_info;

use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tracing::error;

#[derive(Debug, Clone, Default)]
pub struct CpuInfo {
    pub model: String,
    pub physical_cores: usize,
    pub logical_cores: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct LoadAverage {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct NetworkTotals {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

#[derive(Debug, Clone)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_time_ms: u64,
    pub memory_rss_bytes: u64,
}

/// Process counters and the instant the OS handed them over.
#[derive(Debug, Clone)]
pub struct ProcessTable {
    pub read_at: Instant,
    pub samples: Vec<ProcessSample>,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self {
            read_at: Instant::now(),
            samples: Vec::new(),
        }
    }
}

/// Blocking view of the OS accounting layer.
pub trait Host: Send {
    /// Machine-wide CPU usage since the previous call.
    fn cpu_usage_percent(&mut self) -> f64;
    fn cpu_info(&mut self) -> CpuInfo;
    fn memory(&mut self) -> MemoryUsage;
    /// Usage of the filesystem that contains `path`.
    fn disk_usage(&mut self, path: &Path) -> Option<DiskUsage>;
    fn processes(&mut self) -> ProcessTable;
    /// Re-reads the given pids; pids that no longer exist are left out.
    fn refresh_processes(&mut self, pids: &[u32]) -> ProcessTable;
    fn boot_time_unix(&self) -> u64;
    fn load_average(&self) -> LoadAverage;
    fn network_totals(&mut self) -> NetworkTotals;
    fn host_name(&self) -> Option<String>;
    fn long_os_version(&self) -> Option<String>;
}

pub type SharedHost = Arc<Mutex<dyn Host>>;

pub fn shared_host<H: Host + 'static>(host: H) -> SharedHost {
    Arc::new(Mutex::new(host))
}

/// Runs `f` against the host on the blocking pool.
pub async fn with_host<T, F>(host: &SharedHost, f: F) -> Option<T>
where
    F: FnOnce(&mut dyn Host) -> T + Send + 'static,
    T: Send + 'static,
{
    let host = host.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let mut guard = host.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    })
    .await;

    match joined {
        Ok(value) => Some(value),
        Err(err) => {
            error!(error = %err, "ошибка обращения к ОС в blocking-задаче");
            None
        }
    }
}

pub fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}
