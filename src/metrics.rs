use crate::collectors::dynamic::DynamicSnapshot;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at: Instant,
    pub hostscope_requests_total: CounterVec,
    pub probe_failures_total: CounterVec,
    pub processes_dropped_total: Counter,
    pub stream_clients: Gauge,
    pub stream_messages_total: Counter,
    pub cpu_usage_percent: Gauge,
    pub ram_usage_percent: Gauge,
    pub disk_usage_percent: Gauge,
    pub gpu_usage_percent: Gauge,
    pub uptime_seconds: Gauge,
    pub scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let hostscope_requests_total = CounterVec::new(
            opts!("hostscope_requests_total", "Handled API requests by endpoint"),
            &["endpoint"],
        )?;
        let probe_failures_total = CounterVec::new(
            opts!(
                "hostscope_probe_failures_total",
                "Probes that fell back to a default value, by probe"
            ),
            &["probe"],
        )?;
        let processes_dropped_total = Counter::with_opts(opts!(
            "hostscope_processes_dropped_total",
            "Processes that exited during the CPU measurement window"
        ))?;
        let stream_clients = Gauge::with_opts(opts!(
            "hostscope_stream_clients",
            "Currently connected network stream clients"
        ))?;
        let stream_messages_total = Counter::with_opts(opts!(
            "hostscope_stream_messages_total",
            "Network counter messages pushed to stream clients"
        ))?;
        let cpu_usage_percent = Gauge::with_opts(opts!(
            "hostscope_cpu_usage_percent",
            "CPU usage from the last dynamic sample"
        ))?;
        let ram_usage_percent = Gauge::with_opts(opts!(
            "hostscope_ram_usage_percent",
            "RAM usage from the last dynamic sample"
        ))?;
        let disk_usage_percent = Gauge::with_opts(opts!(
            "hostscope_disk_usage_percent",
            "Home filesystem usage from the last dynamic sample"
        ))?;
        let gpu_usage_percent = Gauge::with_opts(opts!(
            "hostscope_gpu_usage_percent",
            "GPU active residency from the last dynamic sample"
        ))?;
        let uptime_seconds = Gauge::with_opts(opts!(
            "hostscope_uptime_seconds",
            "Seconds since the service started"
        ))?;
        let scrape_count_total = Counter::with_opts(opts!(
            "hostscope_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &hostscope_requests_total)?;
        register(&registry, &probe_failures_total)?;
        register(&registry, &processes_dropped_total)?;
        register(&registry, &stream_clients)?;
        register(&registry, &stream_messages_total)?;
        register(&registry, &cpu_usage_percent)?;
        register(&registry, &ram_usage_percent)?;
        register(&registry, &disk_usage_percent)?;
        register(&registry, &gpu_usage_percent)?;
        register(&registry, &uptime_seconds)?;
        register(&registry, &scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            started_at: Instant::now(),
            hostscope_requests_total,
            probe_failures_total,
            processes_dropped_total,
            stream_clients,
            stream_messages_total,
            cpu_usage_percent,
            ram_usage_percent,
            disk_usage_percent,
            gpu_usage_percent,
            uptime_seconds,
            scrape_count_total,
        }))
    }

    pub fn update_from_dynamic(&self, snapshot: &DynamicSnapshot) {
        self.cpu_usage_percent.set(snapshot.cpu_percent);
        self.ram_usage_percent.set(snapshot.memory_percent);
        self.disk_usage_percent.set(snapshot.disk_percent);
        self.gpu_usage_percent.set(snapshot.gpu_percent);
    }

    pub fn inc_request(&self, endpoint: &str) {
        self.hostscope_requests_total
            .with_label_values(&[endpoint])
            .inc();
    }

    pub fn inc_probe_failure(&self, probe: &str) {
        self.probe_failures_total.with_label_values(&[probe]).inc();
    }

    pub fn inc_processes_dropped(&self, count: u64) {
        self.processes_dropped_total.inc_by(count as f64);
    }

    pub fn stream_opened(&self) {
        self.stream_clients.inc();
    }

    pub fn stream_closed(&self) {
        self.stream_clients.dec();
    }

    pub fn inc_stream_message(&self) {
        self.stream_messages_total.inc();
    }

    pub fn inc_scrape_count(&self) {
        self.scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.uptime_seconds
            .set(self.started_at.elapsed().as_secs_f64());
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
