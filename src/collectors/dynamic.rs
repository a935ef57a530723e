use crate::collectors::probes::{GpuUtilProber, ProbeError};
use crate::collectors::{percent, with_host, LoadAverage, ProcessTable, SharedHost};
use crate::metrics::Metrics;
use crate::state::CpuBaselines;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct DynamicSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_bytes: u64,
    pub disk_percent: f64,
    pub disk_used_bytes: u64,
    pub processes: Vec<ProcessStat>,
    pub gpu_percent: f64,
    pub load_average: LoadAverage,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessStat {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_rss_bytes: u64,
}

#[derive(Debug, Default)]
struct HostLoad {
    cpu_percent: f64,
    memory_percent: f64,
    memory_used_bytes: u64,
    disk_percent: f64,
    disk_used_bytes: u64,
    load_average: LoadAverage,
    processes: ProcessTable,
}

pub struct DynamicSampler {
    host: SharedHost,
    baselines: Arc<Mutex<CpuBaselines>>,
    gpu: Arc<dyn GpuUtilProber>,
    gpu_timeout: Duration,
    settle_window: Duration,
    top_n: usize,
    disk_path: PathBuf,
    metrics: Arc<Metrics>,
}

impl DynamicSampler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: SharedHost,
        baselines: Arc<Mutex<CpuBaselines>>,
        gpu: Arc<dyn GpuUtilProber>,
        gpu_timeout: Duration,
        settle_window: Duration,
        top_n: usize,
        disk_path: PathBuf,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            host,
            baselines,
            gpu,
            gpu_timeout,
            settle_window,
            top_n,
            disk_path,
            metrics,
        }
    }

    /// Primes per-process baselines so the first sample has something to diff against.
    /// Returns the number of tracked processes.
    pub async fn seed_baselines(&self) -> usize {
        let Some(table) = with_host(&self.host, |h| h.processes()).await else {
            return 0;
        };
        let mut baselines = self.lock_baselines();
        for p in &table.samples {
            baselines.observe(p.pid, p.cpu_time_ms, table.read_at);
        }
        baselines.len()
    }

    pub async fn sample(&self) -> DynamicSnapshot {
        let gpu = self.gpu.clone();
        let gpu_timeout = self.gpu_timeout;
        let gpu_task = tokio::spawn(async move {
            match time::timeout(gpu_timeout, gpu.gpu_utilization_percent()).await {
                Ok(result) => result,
                Err(_elapsed) => Err(ProbeError::Timeout {
                    program: "gpu".to_string(),
                    timeout_ms: gpu_timeout.as_millis() as u64,
                }),
            }
        });

        let disk_path = self.disk_path.clone();
        let load = with_host(&self.host, move |h| {
            let cpu_percent = h.cpu_usage_percent();
            let memory = h.memory();
            let disk = h.disk_usage(&disk_path).unwrap_or_default();
            HostLoad {
                cpu_percent,
                memory_percent: percent(memory.used_bytes, memory.total_bytes),
                memory_used_bytes: memory.used_bytes,
                disk_percent: percent(disk.used_bytes, disk.total_bytes),
                disk_used_bytes: disk.used_bytes,
                load_average: h.load_average(),
                processes: h.processes(),
            }
        })
        .await
        .unwrap_or_default();

        let names: HashMap<u32, String> = {
            let read_at = load.processes.read_at;
            let mut baselines = self.lock_baselines();
            load.processes
                .samples
                .iter()
                .map(|p| {
                    baselines.observe(p.pid, p.cpu_time_ms, read_at);
                    (p.pid, p.name.clone())
                })
                .collect()
        };

        time::sleep(self.settle_window).await;

        let pids: Vec<u32> = names.keys().copied().collect();
        let survivors = with_host(&self.host, move |h| h.refresh_processes(&pids))
            .await
            .unwrap_or_default();

        let vanished = names.len().saturating_sub(survivors.samples.len());
        if vanished > 0 {
            debug!(vanished, "процессы завершились во время окна измерения");
            self.metrics.inc_processes_dropped(vanished as u64);
        }

        let mut processes: Vec<ProcessStat> = {
            let read_at = survivors.read_at;
            let mut baselines = self.lock_baselines();
            survivors
                .samples
                .into_iter()
                .map(|p| ProcessStat {
                    cpu_percent: baselines.observe(p.pid, p.cpu_time_ms, read_at),
                    name: names.get(&p.pid).cloned().unwrap_or(p.name),
                    pid: p.pid,
                    memory_rss_bytes: p.memory_rss_bytes,
                })
                .collect()
        };
        processes.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
        processes.truncate(self.top_n);

        let gpu_percent = match gpu_task.await {
            Ok(Ok(v)) => v,
            Ok(Err(ProbeError::Disabled)) => 0.0,
            Ok(Err(err)) => {
                warn!(probe = "gpu_util", error = %err, "не удалось получить загрузку GPU");
                self.metrics.inc_probe_failure("gpu_util");
                0.0
            }
            Err(err) => {
                warn!(probe = "gpu_util", error = %err, "задача опроса GPU завершилась аварийно");
                self.metrics.inc_probe_failure("gpu_util");
                0.0
            }
        };

        let snapshot = DynamicSnapshot {
            cpu_percent: load.cpu_percent,
            memory_percent: load.memory_percent,
            memory_used_bytes: load.memory_used_bytes,
            disk_percent: load.disk_percent,
            disk_used_bytes: load.disk_used_bytes,
            processes,
            gpu_percent,
            load_average: load.load_average,
        };
        self.metrics.update_from_dynamic(&snapshot);
        snapshot
    }

    fn lock_baselines(&self) -> std::sync::MutexGuard<'_, CpuBaselines> {
        self.baselines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
