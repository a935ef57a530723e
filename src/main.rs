mod collectors;
mod config;
mod http;
mod metrics;
mod state;

use axum::serve;
use clap::Parser;
use collectors::dynamic::DynamicSampler;
use collectors::host::SysinfoHost;
use collectors::local_ip::LocalIpChain;
use collectors::network::NetworkPublisher;
use collectors::probes::{
    default_os_version_prober, DisabledGpuCores, DisabledGpuUtil, GpuCoreProber, GpuUtilProber,
    Powermetrics, SystemProfilerGpuCores,
};
use collectors::shared_host;
use collectors::static_info::StaticInfoProvider;
use config::{Config, ConfigError};
use http::HttpAppState;
use metrics::Metrics;
use state::CpuBaselines;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostscope")]
#[command(version)]
struct Cli {
    /// YAML config; built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides `listen` from the config.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match load_config(cli.config.as_deref(), cli.listen) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };

    let disk_path = cfg
        .disk_path
        .clone()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("/"));

    info!(
        listen = %cfg.listen,
        disk_path = %disk_path.display(),
        settle_window_ms = cfg.settle_window_ms,
        "запуск hostscope"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };

    let app_state = build_app_state(&cfg, disk_path, metrics).await;

    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "некорректный адрес listen");
            std::process::exit(1);
        }
    };
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, listen = %addr, "не удалось запустить HTTP-сервер");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let http_task = {
        let app = http::build_router(app_state, &cfg.cors);
        tokio::spawn(async move {
            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    };
    info!(listen = %addr, "HTTP-сервер запущен");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");

    let _ = shutdown_tx.send(true);
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&str>, listen: Option<String>) -> Result<Config, ConfigError> {
    let mut cfg = match path {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    if let Some(listen) = listen {
        cfg.listen = listen;
    }
    cfg.validate()?;
    Ok(cfg)
}

async fn build_app_state(cfg: &Config, disk_path: PathBuf, metrics: Arc<Metrics>) -> HttpAppState {
    let host = shared_host(SysinfoHost::new());

    let gpu_util: Arc<dyn GpuUtilProber> = if cfg.gpu_util.enabled {
        Arc::new(Powermetrics::from_config(&cfg.gpu_util))
    } else {
        Arc::new(DisabledGpuUtil)
    };
    let gpu_cores: Box<dyn GpuCoreProber> = if cfg.gpu_cores.enabled {
        Box::new(SystemProfilerGpuCores)
    } else {
        Box::new(DisabledGpuCores)
    };

    let static_info = StaticInfoProvider::new(
        host.clone(),
        default_os_version_prober(host.clone()),
        gpu_cores,
        Box::new(LocalIpChain::from_config(host.clone(), &cfg.local_ip)),
        disk_path.clone(),
        metrics.clone(),
    );

    let sampler = DynamicSampler::new(
        host.clone(),
        Arc::new(Mutex::new(CpuBaselines::new())),
        gpu_util,
        Duration::from_millis(cfg.gpu_util.timeout_ms),
        cfg.settle_window(),
        cfg.top_processes,
        disk_path,
        metrics.clone(),
    );
    let seeded = sampler.seed_baselines().await;
    info!(processes = seeded, "базовые значения CPU процессов инициализированы");

    let network = NetworkPublisher::new(host, cfg.stream_tick(), metrics.clone());

    HttpAppState {
        metrics,
        static_info: Arc::new(static_info),
        sampler: Arc::new(sampler),
        network: Arc::new(network),
    }
}
