use crate::collectors::local_ip::LocalIpResolver;
use crate::collectors::probes::{GpuCoreProber, GpuUtilProber, OsVersionProber, ProbeError};
use crate::collectors::{
    CpuInfo, DiskUsage, Host, LoadAverage, MemoryUsage, NetworkTotals, ProcessSample,
    ProcessTable,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct FakeProcess {
    pub name: String,
    pub cpu_time_ms: u64,
    pub memory_rss_bytes: u64,
    /// CPU time added on every refresh.
    pub cpu_step_ms: u64,
}

/// Scripted OS layer. Processes listed in `vanish_on_refresh` disappear
/// between enumeration and the second read.
#[derive(Debug, Default)]
pub struct FakeHost {
    pub cpu_percent: f64,
    pub cpu: CpuInfo,
    pub memory: MemoryUsage,
    pub disk: Option<DiskUsage>,
    pub disk_paths: Vec<PathBuf>,
    pub processes: HashMap<u32, FakeProcess>,
    pub vanish_on_refresh: Vec<u32>,
    pub boot_time_unix: u64,
    pub load: LoadAverage,
    pub network: Arc<AtomicU64>,
    pub host_name: Option<String>,
    pub os_version: Option<String>,
    /// Blocking time spent after the counters are read on full enumeration.
    pub enumeration_delay: Duration,
}

impl FakeHost {
    pub fn with_memory(mut self, total: u64, used: u64) -> Self {
        self.memory = MemoryUsage {
            total_bytes: total,
            used_bytes: used,
        };
        self
    }

    pub fn with_disk(mut self, total: u64, used: u64) -> Self {
        self.disk = Some(DiskUsage {
            total_bytes: total,
            used_bytes: used,
        });
        self
    }

    pub fn with_process(mut self, pid: u32, name: &str, cpu_step_ms: u64, rss: u64) -> Self {
        self.processes.insert(
            pid,
            FakeProcess {
                name: name.to_string(),
                cpu_time_ms: 1_000,
                memory_rss_bytes: rss,
                cpu_step_ms,
            },
        );
        self
    }

    pub fn vanishing(mut self, pid: u32) -> Self {
        self.vanish_on_refresh.push(pid);
        self
    }

    pub fn with_host_name(mut self, name: Option<&str>) -> Self {
        self.host_name = name.map(str::to_string);
        self
    }

    pub fn with_os_version(mut self, version: Option<&str>) -> Self {
        self.os_version = version.map(str::to_string);
        self
    }

    fn sample(pid: u32, p: &FakeProcess) -> ProcessSample {
        ProcessSample {
            pid,
            name: p.name.clone(),
            cpu_time_ms: p.cpu_time_ms,
            memory_rss_bytes: p.memory_rss_bytes,
        }
    }
}

impl Host for FakeHost {
    fn cpu_usage_percent(&mut self) -> f64 {
        self.cpu_percent
    }

    fn cpu_info(&mut self) -> CpuInfo {
        self.cpu.clone()
    }

    fn memory(&mut self) -> MemoryUsage {
        self.memory
    }

    fn disk_usage(&mut self, path: &Path) -> Option<DiskUsage> {
        self.disk_paths.push(path.to_path_buf());
        self.disk
    }

    fn processes(&mut self) -> ProcessTable {
        let read_at = Instant::now();
        let mut samples: Vec<ProcessSample> = self
            .processes
            .iter()
            .map(|(pid, p)| Self::sample(*pid, p))
            .collect();
        samples.sort_by_key(|p| p.pid);
        if !self.enumeration_delay.is_zero() {
            std::thread::sleep(self.enumeration_delay);
        }
        ProcessTable { read_at, samples }
    }

    fn refresh_processes(&mut self, pids: &[u32]) -> ProcessTable {
        for pid in self.vanish_on_refresh.drain(..) {
            self.processes.remove(&pid);
        }
        let samples = pids
            .iter()
            .filter_map(|pid| {
                let p = self.processes.get_mut(pid)?;
                p.cpu_time_ms += p.cpu_step_ms;
                Some(Self::sample(*pid, p))
            })
            .collect();
        ProcessTable {
            read_at: Instant::now(),
            samples,
        }
    }

    fn boot_time_unix(&self) -> u64 {
        self.boot_time_unix
    }

    fn load_average(&self) -> LoadAverage {
        self.load
    }

    fn network_totals(&mut self) -> NetworkTotals {
        let n = self.network.fetch_add(1, Ordering::SeqCst) + 1;
        NetworkTotals {
            bytes_sent: n * 100,
            bytes_recv: n * 1000,
        }
    }

    fn host_name(&self) -> Option<String> {
        self.host_name.clone()
    }

    fn long_os_version(&self) -> Option<String> {
        self.os_version.clone()
    }
}

pub enum FakeGpu {
    Percent(f64),
    Fail,
    Hang,
    /// Returns after a delay, like the real one-second sampler.
    Slow(f64, Duration),
}

#[async_trait]
impl GpuUtilProber for FakeGpu {
    async fn gpu_utilization_percent(&self) -> Result<f64, ProbeError> {
        match self {
            FakeGpu::Percent(v) => Ok(*v),
            FakeGpu::Fail => Err(ProbeError::Unavailable("нет прав".to_string())),
            FakeGpu::Hang => {
                std::future::pending::<()>().await;
                Ok(0.0)
            }
            FakeGpu::Slow(v, delay) => {
                tokio::time::sleep(*delay).await;
                Ok(*v)
            }
        }
    }
}

pub struct FakeGpuCores(pub Result<u32, ()>);

#[async_trait]
impl GpuCoreProber for FakeGpuCores {
    async fn gpu_core_count(&self) -> Result<u32, ProbeError> {
        self.0.map_err(|_| ProbeError::Parse {
            program: "system_profiler".to_string(),
        })
    }
}

pub struct FakeOsVersion(pub Option<String>);

#[async_trait]
impl OsVersionProber for FakeOsVersion {
    async fn os_version(&self) -> Result<String, ProbeError> {
        self.0.clone().ok_or_else(|| ProbeError::Spawn {
            program: "sw_vers".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    }
}

pub struct FakeLocalIp(pub Option<IpAddr>);

#[async_trait]
impl LocalIpResolver for FakeLocalIp {
    async fn local_ip(&self) -> Option<IpAddr> {
        self.0
    }
}

/// Counts how many times the host was asked for network totals.
pub fn network_calls(counter: &Arc<AtomicU64>) -> u64 {
    counter.load(Ordering::SeqCst)
}

pub fn shared_counter() -> Arc<AtomicU64> {
    Arc::new(AtomicU64::new(0))
}

pub fn host_mutex<H: Host + 'static>(host: H) -> Arc<Mutex<H>> {
    Arc::new(Mutex::new(host))
}
