use crate::collectors::{
    CpuInfo, DiskUsage, Host, LoadAverage, MemoryUsage, NetworkTotals, ProcessSample,
    ProcessTable,
};
use std::path::{Path, PathBuf};
use sysinfo::{
    Disks, Networks, Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System,
};
use tokio::time::Instant;

pub struct SysinfoHost {
    system: System,
}

impl Default for SysinfoHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoHost {
    pub fn new() -> Self {
        let mut system = System::new();
        // seeds the machine-wide CPU baseline for the first dynamic sample
        system.refresh_cpu_all();
        system.refresh_memory();
        Self { system }
    }

    fn process_refresh_kind() -> ProcessRefreshKind {
        ProcessRefreshKind::nothing().with_cpu().with_memory()
    }
}

impl Host for SysinfoHost {
    fn cpu_usage_percent(&mut self) -> f64 {
        self.system.refresh_cpu_usage();
        self.system.global_cpu_usage() as f64
    }

    fn cpu_info(&mut self) -> CpuInfo {
        let cpus = self.system.cpus();
        CpuInfo {
            model: cpus
                .first()
                .map(|c| c.brand().trim().to_string())
                .unwrap_or_default(),
            physical_cores: System::physical_core_count().unwrap_or(0),
            logical_cores: cpus.len(),
        }
    }

    fn memory(&mut self) -> MemoryUsage {
        self.system.refresh_memory();
        MemoryUsage {
            total_bytes: self.system.total_memory(),
            used_bytes: self.system.used_memory(),
        }
    }

    fn disk_usage(&mut self, path: &Path) -> Option<DiskUsage> {
        let disks = Disks::new_with_refreshed_list();
        let mounts: Vec<MountUsage> = disks
            .iter()
            .map(|d| MountUsage {
                mount: d.mount_point().to_path_buf(),
                total_bytes: d.total_space(),
                available_bytes: d.available_space(),
            })
            .collect();
        disk_for_path(&mounts, path)
    }

    fn processes(&mut self) -> ProcessTable {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            Self::process_refresh_kind(),
        );
        let read_at = Instant::now();
        ProcessTable {
            read_at,
            samples: self
                .system
                .processes()
                .iter()
                .map(|(pid, process)| to_sample(*pid, process))
                .collect(),
        }
    }

    fn refresh_processes(&mut self, pids: &[u32]) -> ProcessTable {
        let pids: Vec<Pid> = pids.iter().map(|p| Pid::from_u32(*p)).collect();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            Self::process_refresh_kind(),
        );
        let read_at = Instant::now();
        ProcessTable {
            read_at,
            samples: pids
                .iter()
                .filter_map(|pid| self.system.process(*pid).map(|p| to_sample(*pid, p)))
                .collect(),
        }
    }

    fn boot_time_unix(&self) -> u64 {
        System::boot_time()
    }

    fn load_average(&self) -> LoadAverage {
        let load = System::load_average();
        LoadAverage {
            load1: load.one,
            load5: load.five,
            load15: load.fifteen,
        }
    }

    fn network_totals(&mut self) -> NetworkTotals {
        let networks = Networks::new_with_refreshed_list();
        networks
            .iter()
            .fold(NetworkTotals::default(), |acc, (_iface, data)| NetworkTotals {
                bytes_sent: acc.bytes_sent.saturating_add(data.total_transmitted()),
                bytes_recv: acc.bytes_recv.saturating_add(data.total_received()),
            })
    }

    fn host_name(&self) -> Option<String> {
        System::host_name()
    }

    fn long_os_version(&self) -> Option<String> {
        System::long_os_version()
    }
}

fn to_sample(pid: Pid, process: &Process) -> ProcessSample {
    ProcessSample {
        pid: pid.as_u32(),
        name: process.name().to_string_lossy().to_string(),
        cpu_time_ms: process.accumulated_cpu_time(),
        memory_rss_bytes: process.memory(),
    }
}

#[derive(Debug, Clone)]
pub struct MountUsage {
    pub mount: PathBuf,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Picks the mount with the longest prefix of `path`.
pub fn disk_for_path(mounts: &[MountUsage], path: &Path) -> Option<DiskUsage> {
    mounts
        .iter()
        .filter(|m| path.starts_with(&m.mount))
        .max_by_key(|m| m.mount.components().count())
        .map(|m| DiskUsage {
            total_bytes: m.total_bytes,
            used_bytes: m.total_bytes.saturating_sub(m.available_bytes),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(path: &str, total: u64, avail: u64) -> MountUsage {
        MountUsage {
            mount: PathBuf::from(path),
            total_bytes: total,
            available_bytes: avail,
        }
    }

    #[test]
    fn home_disk_prefers_deepest_mount() {
        let mounts = vec![
            mount("/", 100, 90),
            mount("/System/Volumes/Data", 1000, 400),
            mount("/Volumes/External", 5000, 5000),
        ];
        let usage = disk_for_path(&mounts, Path::new("/System/Volumes/Data/Users/me"))
            .expect("диск должен найтись");
        assert_eq!(usage.total_bytes, 1000);
        assert_eq!(usage.used_bytes, 600);
    }

    #[test]
    fn falls_back_to_root_mount() {
        let mounts = vec![mount("/", 100, 25), mount("/boot", 10, 5)];
        let usage = disk_for_path(&mounts, Path::new("/home/me")).expect("root");
        assert_eq!(usage.total_bytes, 100);
        assert_eq!(usage.used_bytes, 75);
    }

    #[test]
    fn mount_prefix_matches_whole_components() {
        let mounts = vec![mount("/", 100, 50), mount("/home2", 10, 5)];
        let usage = disk_for_path(&mounts, Path::new("/home/me")).expect("root");
        assert_eq!(usage.total_bytes, 100);
    }

    #[test]
    fn no_matching_mount_is_none() {
        let mounts = vec![mount("/data", 100, 50)];
        assert!(disk_for_path(&mounts, Path::new("/home/me")).is_none());
    }

    #[test]
    fn available_larger_than_total_saturates() {
        let mounts = vec![mount("/", 10, 20)];
        let usage = disk_for_path(&mounts, Path::new("/x")).expect("root");
        assert_eq!(usage.used_bytes, 0);
    }

    #[test]
    fn sysinfo_host_reports_sane_values() {
        let mut host = SysinfoHost::new();
        let mem = host.memory();
        assert!(mem.total_bytes >= mem.used_bytes);
        let cpu = host.cpu_info();
        assert!(cpu.logical_cores >= 1);
        let pct = host.cpu_usage_percent();
        assert!(pct.is_finite() && pct >= 0.0);
        let me = std::process::id();
        let procs = host.refresh_processes(&[me]).samples;
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].pid, me);
    }
}
