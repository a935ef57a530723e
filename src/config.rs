use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_settle_window_ms")]
    pub settle_window_ms: u64,
    #[serde(default = "default_top_processes")]
    pub top_processes: usize,
    #[serde(default = "default_stream_tick_ms")]
    pub stream_tick_ms: u64,
    #[serde(default)]
    pub disk_path: Option<PathBuf>,
    #[serde(default)]
    pub gpu_util: GpuUtilConfig,
    #[serde(default)]
    pub gpu_cores: GpuCoresConfig,
    #[serde(default)]
    pub local_ip: LocalIpConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GpuUtilConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_powermetrics_program")]
    pub program: String,
    #[serde(default = "default_true")]
    pub use_sudo: bool,
    #[serde(default = "default_gpu_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_gpu_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GpuCoresConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalIpConfig {
    #[serde(default = "default_udp_target")]
    pub udp_target: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            settle_window_ms: default_settle_window_ms(),
            top_processes: default_top_processes(),
            stream_tick_ms: default_stream_tick_ms(),
            disk_path: None,
            gpu_util: GpuUtilConfig::default(),
            gpu_cores: GpuCoresConfig::default(),
            local_ip: LocalIpConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Default for GpuUtilConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: default_powermetrics_program(),
            use_sudo: true,
            sample_interval_ms: default_gpu_sample_interval_ms(),
            timeout_ms: default_gpu_timeout_ms(),
        }
    }
}

impl Default for GpuCoresConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LocalIpConfig {
    fn default() -> Self {
        Self {
            udp_target: default_udp_target(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }
        if !(50..=10_000).contains(&self.settle_window_ms) {
            return Err(ConfigError::Validation(
                "settle_window_ms должно быть в диапазоне 50..10000".to_string(),
            ));
        }
        if self.top_processes < 1 {
            return Err(ConfigError::Validation(
                "top_processes должно быть >= 1".to_string(),
            ));
        }
        if self.stream_tick_ms < 10 {
            return Err(ConfigError::Validation(
                "stream_tick_ms должно быть >= 10".to_string(),
            ));
        }

        validate_gpu_util(&self.gpu_util)?;
        validate_local_ip(&self.local_ip)?;
        validate_cors(&self.cors)?;

        Ok(())
    }

    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }

    pub fn stream_tick(&self) -> Duration {
        Duration::from_millis(self.stream_tick_ms)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_gpu_util(cfg: &GpuUtilConfig) -> Result<(), ConfigError> {
    if cfg.program.trim().is_empty() {
        return Err(ConfigError::Validation(
            "gpu_util.program не должен быть пустым".to_string(),
        ));
    }
    if cfg.sample_interval_ms < 100 {
        return Err(ConfigError::Validation(
            "gpu_util.sample_interval_ms должно быть >= 100".to_string(),
        ));
    }
    if cfg.timeout_ms <= cfg.sample_interval_ms {
        return Err(ConfigError::Validation(
            "gpu_util.timeout_ms должно быть больше sample_interval_ms".to_string(),
        ));
    }
    Ok(())
}

fn validate_local_ip(cfg: &LocalIpConfig) -> Result<(), ConfigError> {
    if SocketAddr::from_str(&cfg.udp_target).is_err() {
        return Err(ConfigError::Validation(
            "local_ip.udp_target должен быть корректным адресом ip:port".to_string(),
        ));
    }
    if cfg.connect_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "local_ip.connect_timeout_ms должно быть >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_cors(cfg: &CorsConfig) -> Result<(), ConfigError> {
    for origin in &cfg.allowed_origins {
        if origin == "*" {
            continue;
        }
        if origin.trim().is_empty() || HeaderValue::from_str(origin).is_err() {
            return Err(ConfigError::Validation(format!(
                "cors.allowed_origins: некорректный origin '{}'",
                origin
            )));
        }
    }
    Ok(())
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

const fn default_settle_window_ms() -> u64 {
    500
}

const fn default_top_processes() -> usize {
    5
}

const fn default_stream_tick_ms() -> u64 {
    1000
}

const fn default_true() -> bool {
    true
}

fn default_powermetrics_program() -> String {
    "/usr/bin/powermetrics".to_string()
}

const fn default_gpu_sample_interval_ms() -> u64 {
    1000
}

const fn default_gpu_timeout_ms() -> u64 {
    3000
}

fn default_udp_target() -> String {
    "8.8.8.8:80".to_string()
}

const fn default_connect_timeout_ms() -> u64 {
    100
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().expect("конфигурация по умолчанию должна быть валидной");
        assert_eq!(cfg.settle_window(), Duration::from_millis(500));
        assert_eq!(cfg.stream_tick(), Duration::from_secs(1));
        assert_eq!(cfg.top_processes, 5);
    }

    #[test]
    fn example_yaml_parses_and_validates() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("разбор примера");
        cfg.validate().expect("пример должен проходить валидацию");
        assert_eq!(cfg.local_ip.udp_target, "8.8.8.8:80");
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: Config = serde_yaml::from_str("listen: \"127.0.0.1:9000\"\ngpu_util:\n  use_sudo: false\n")
            .expect("разбор частичного YAML");
        assert_eq!(cfg.listen, "127.0.0.1:9000");
        assert!(!cfg.gpu_util.use_sudo);
        assert!(cfg.gpu_util.enabled);
        assert_eq!(cfg.gpu_util.program, "/usr/bin/powermetrics");
        assert_eq!(cfg.cors.allowed_origins, vec!["*".to_string()]);
    }

    #[test]
    fn rejects_gpu_timeout_not_longer_than_sample() {
        let mut cfg = Config::default();
        cfg.gpu_util.timeout_ms = cfg.gpu_util.sample_interval_ms;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_bad_listen_and_udp_target() {
        let mut cfg = Config::default();
        cfg.listen = "localhost".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.local_ip.udp_target = "dns.google".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_invalid_origin() {
        let mut cfg = Config::default();
        cfg.cors.allowed_origins = vec!["http://ok.example".to_string(), "bad\norigin".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_from_missing_file_reports_path() {
        let err = Config::load_from_file("/nonexistent/hostscope.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { ref path, .. } if path.contains("hostscope.yaml")));
    }
}
