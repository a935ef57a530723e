use crate::collectors::local_ip::{LocalIpResolver, LOCAL_IP_UNAVAILABLE};
use crate::collectors::probes::{platform_descriptor, GpuCoreProber, OsVersionProber, ProbeError};
use crate::collectors::{with_host, CpuInfo, SharedHost};
use crate::metrics::Metrics;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct StaticSnapshot {
    pub os_version: String,
    pub cpu_model: String,
    pub physical_cores: usize,
    pub logical_cores: usize,
    pub gpu_cores: Option<u32>,
    pub total_memory_bytes: u64,
    pub total_disk_bytes: u64,
    pub local_ip: String,
    pub boot_time: String,
    pub uptime_seconds: f64,
}

#[derive(Debug, Default)]
struct HostIdentity {
    cpu: CpuInfo,
    total_memory_bytes: u64,
    total_disk_bytes: u64,
    boot_time_unix: u64,
}

pub struct StaticInfoProvider {
    host: SharedHost,
    os_version: Box<dyn OsVersionProber>,
    gpu_cores: Box<dyn GpuCoreProber>,
    local_ip: Box<dyn LocalIpResolver>,
    disk_path: PathBuf,
    metrics: Arc<Metrics>,
}

impl StaticInfoProvider {
    pub fn new(
        host: SharedHost,
        os_version: Box<dyn OsVersionProber>,
        gpu_cores: Box<dyn GpuCoreProber>,
        local_ip: Box<dyn LocalIpResolver>,
        disk_path: PathBuf,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            host,
            os_version,
            gpu_cores,
            local_ip,
            disk_path,
            metrics,
        }
    }

    pub async fn snapshot(&self) -> StaticSnapshot {
        let disk_path = self.disk_path.clone();
        let identity = with_host(&self.host, move |h| HostIdentity {
            cpu: h.cpu_info(),
            total_memory_bytes: h.memory().total_bytes,
            total_disk_bytes: h.disk_usage(&disk_path).map(|d| d.total_bytes).unwrap_or(0),
            boot_time_unix: h.boot_time_unix(),
        });

        let (identity, os_version, gpu_cores, local_ip) = tokio::join!(
            identity,
            self.os_version.os_version(),
            self.gpu_cores.gpu_core_count(),
            self.local_ip.local_ip(),
        );
        let identity = identity.unwrap_or_default();

        let os_version = os_version.unwrap_or_else(|err| {
            self.probe_degraded("os_version", &err);
            platform_descriptor()
        });
        let gpu_cores = match gpu_cores {
            Ok(cores) => Some(cores),
            Err(err) => {
                self.probe_degraded("gpu_cores", &err);
                None
            }
        };
        let local_ip = match local_ip {
            Some(ip) => ip.to_string(),
            None => {
                warn!(probe = "local_ip", "не удалось определить локальный IP");
                self.metrics.inc_probe_failure("local_ip");
                LOCAL_IP_UNAVAILABLE.to_string()
            }
        };

        let boot = UNIX_EPOCH + Duration::from_secs(identity.boot_time_unix);
        let uptime_seconds = SystemTime::now()
            .duration_since(boot)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        StaticSnapshot {
            os_version,
            cpu_model: identity.cpu.model,
            physical_cores: identity.cpu.physical_cores,
            logical_cores: identity.cpu.logical_cores,
            gpu_cores,
            total_memory_bytes: identity.total_memory_bytes,
            total_disk_bytes: identity.total_disk_bytes,
            local_ip,
            boot_time: humantime::format_rfc3339_seconds(boot).to_string(),
            uptime_seconds,
        }
    }

    fn probe_degraded(&self, probe: &'static str, err: &ProbeError) {
        if matches!(err, ProbeError::Disabled) {
            return;
        }
        warn!(probe, error = %err, "проба недоступна, используется значение по умолчанию");
        self.metrics.inc_probe_failure(probe);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::fake::{FakeGpuCores, FakeHost, FakeLocalIp, FakeOsVersion};
    use crate::collectors::shared_host;

    fn provider(
        os: Option<&str>,
        gpu: Result<u32, ()>,
        ip: Option<&str>,
    ) -> StaticInfoProvider {
        let mut host = FakeHost::default()
            .with_memory(32 << 30, 1 << 30)
            .with_disk(500 << 30, 100 << 30);
        host.cpu = CpuInfo {
            model: "Apple M2 Pro".to_string(),
            physical_cores: 10,
            logical_cores: 12,
        };
        host.boot_time_unix = 1_700_000_000;
        StaticInfoProvider::new(
            shared_host(host),
            Box::new(FakeOsVersion(os.map(str::to_string))),
            Box::new(FakeGpuCores(gpu)),
            Box::new(FakeLocalIp(ip.map(|v| v.parse().unwrap()))),
            PathBuf::from("/Users/me"),
            Metrics::new().expect("метрики"),
        )
    }

    #[tokio::test]
    async fn full_snapshot() {
        let snap = provider(Some("macOS 14.5"), Ok(19), Some("192.168.1.23"))
            .snapshot()
            .await;
        assert_eq!(snap.os_version, "macOS 14.5");
        assert_eq!(snap.cpu_model, "Apple M2 Pro");
        assert_eq!(snap.physical_cores, 10);
        assert_eq!(snap.logical_cores, 12);
        assert_eq!(snap.gpu_cores, Some(19));
        assert_eq!(snap.total_memory_bytes, 32 << 30);
        assert_eq!(snap.total_disk_bytes, 500 << 30);
        assert_eq!(snap.local_ip, "192.168.1.23");
        assert_eq!(snap.boot_time, "2023-11-14T22:13:20Z");
        assert!(snap.uptime_seconds > 0.0);
    }

    #[tokio::test]
    async fn probes_degrade_to_fallbacks() {
        let p = provider(None, Err(()), None);
        let snap = p.snapshot().await;
        assert_eq!(snap.os_version, platform_descriptor());
        assert_eq!(snap.gpu_cores, None);
        assert_eq!(snap.local_ip, LOCAL_IP_UNAVAILABLE);
        for probe in ["os_version", "gpu_cores", "local_ip"] {
            assert_eq!(
                p.metrics.probe_failures_total.with_label_values(&[probe]).get(),
                1.0,
                "{probe}"
            );
        }
    }

    #[tokio::test]
    async fn json_keeps_null_gpu_cores_and_local_ip() {
        let snap = provider(Some("Linux"), Err(()), None).snapshot().await;
        let json = serde_json::to_value(&snap).expect("json");
        assert!(json["gpu_cores"].is_null());
        assert_eq!(json["local_ip"], "N/A");

        let snap = provider(Some("Linux"), Ok(8), Some("::ffff:10.0.0.1")).snapshot().await;
        let json = serde_json::to_value(&snap).expect("json");
        assert_eq!(json["gpu_cores"], 8);
        assert!(json["local_ip"].is_string());
    }
}
