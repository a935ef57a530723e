use crate::collectors::{with_host, SharedHost};
use crate::config::GpuUtilConfig;
use async_trait::async_trait;
use regex::Regex;
use std::process::{ExitStatus, Stdio};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time;

const SW_VERS_TIMEOUT: Duration = Duration::from_secs(2);
const SYSTEM_PROFILER_TIMEOUT: Duration = Duration::from_secs(10);

static GPU_RESIDENCY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"GPU HW active residency:\s+(\d+\.?\d*)%").expect("регулярное выражение GPU residency")
});

static GPU_CORES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Total Number of Cores:\s*(\d+)").expect("регулярное выражение GPU cores")
});

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("не удалось запустить {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} завершился с ошибкой: {status}")]
    ExitStatus { program: String, status: ExitStatus },
    #[error("{program} не ответил за {timeout_ms} мс")]
    Timeout { program: String, timeout_ms: u64 },
    #[error("не удалось разобрать вывод {program}")]
    Parse { program: String },
    #[error("проба отключена в конфигурации")]
    Disabled,
    #[error("{0}")]
    Unavailable(String),
}

#[async_trait]
pub trait GpuUtilProber: Send + Sync {
    async fn gpu_utilization_percent(&self) -> Result<f64, ProbeError>;
}

#[async_trait]
pub trait GpuCoreProber: Send + Sync {
    async fn gpu_core_count(&self) -> Result<u32, ProbeError>;
}

#[async_trait]
pub trait OsVersionProber: Send + Sync {
    async fn os_version(&self) -> Result<String, ProbeError>;
}

pub async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, ProbeError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = match time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(ProbeError::Spawn {
                program: program.to_string(),
                source,
            })
        }
        Err(_elapsed) => {
            return Err(ProbeError::Timeout {
                program: program.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    };

    if !output.status.success() {
        return Err(ProbeError::ExitStatus {
            program: program.to_string(),
            status: output.status,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub fn parse_gpu_residency(text: &str) -> Option<f64> {
    let caps = GPU_RESIDENCY_RE.captures(text)?;
    let value = caps.get(1)?.as_str().parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

pub fn parse_gpu_cores(text: &str) -> Option<u32> {
    let caps = GPU_CORES_RE.captures(text)?;
    caps.get(1)?.as_str().parse::<u32>().ok()
}

pub fn platform_descriptor() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// `powermetrics --samplers gpu_power`, needs root.
pub struct Powermetrics {
    program: String,
    use_sudo: bool,
    sample_interval_ms: u64,
    timeout: Duration,
}

impl Powermetrics {
    pub fn from_config(cfg: &GpuUtilConfig) -> Self {
        Self {
            program: cfg.program.clone(),
            use_sudo: cfg.use_sudo,
            sample_interval_ms: cfg.sample_interval_ms,
            timeout: Duration::from_millis(cfg.timeout_ms),
        }
    }
}

#[async_trait]
impl GpuUtilProber for Powermetrics {
    async fn gpu_utilization_percent(&self) -> Result<f64, ProbeError> {
        let interval = self.sample_interval_ms.to_string();
        let sampler_args = [
            "--samplers",
            "gpu_power",
            "-i",
            interval.as_str(),
            "-n",
            "1",
        ];

        let text = if self.use_sudo {
            // -n: fail instead of waiting for a password prompt
            let mut args = vec!["-n", self.program.as_str()];
            args.extend(sampler_args);
            run_command("sudo", &args, self.timeout).await?
        } else {
            run_command(&self.program, &sampler_args, self.timeout).await?
        };

        parse_gpu_residency(&text).ok_or_else(|| ProbeError::Parse {
            program: self.program.clone(),
        })
    }
}

pub struct DisabledGpuUtil;

#[async_trait]
impl GpuUtilProber for DisabledGpuUtil {
    async fn gpu_utilization_percent(&self) -> Result<f64, ProbeError> {
        Err(ProbeError::Disabled)
    }
}

pub struct SystemProfilerGpuCores;

#[async_trait]
impl GpuCoreProber for SystemProfilerGpuCores {
    async fn gpu_core_count(&self) -> Result<u32, ProbeError> {
        let text = run_command(
            "system_profiler",
            &["SPDisplaysDataType"],
            SYSTEM_PROFILER_TIMEOUT,
        )
        .await?;
        parse_gpu_cores(&text).ok_or_else(|| ProbeError::Parse {
            program: "system_profiler".to_string(),
        })
    }
}

pub struct DisabledGpuCores;

#[async_trait]
impl GpuCoreProber for DisabledGpuCores {
    async fn gpu_core_count(&self) -> Result<u32, ProbeError> {
        Err(ProbeError::Disabled)
    }
}

pub struct SwVers;

#[async_trait]
impl OsVersionProber for SwVers {
    async fn os_version(&self) -> Result<String, ProbeError> {
        let name = run_command("sw_vers", &["-productName"], SW_VERS_TIMEOUT).await?;
        let version = run_command("sw_vers", &["-productVersion"], SW_VERS_TIMEOUT).await?;
        let joined = format!("{} {}", name.trim(), version.trim());
        if joined.trim().is_empty() {
            return Err(ProbeError::Parse {
                program: "sw_vers".to_string(),
            });
        }
        Ok(joined.trim().to_string())
    }
}

pub struct HostOsVersion {
    host: SharedHost,
}

impl HostOsVersion {
    pub fn new(host: SharedHost) -> Self {
        Self { host }
    }
}

#[async_trait]
impl OsVersionProber for HostOsVersion {
    async fn os_version(&self) -> Result<String, ProbeError> {
        with_host(&self.host, |h| h.long_os_version())
            .await
            .flatten()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ProbeError::Unavailable("ОС не сообщила версию".to_string()))
    }
}

pub fn default_os_version_prober(host: SharedHost) -> Box<dyn OsVersionProber> {
    if cfg!(target_os = "macos") {
        Box::new(SwVers)
    } else {
        Box::new(HostOsVersion::new(host))
    }
}
