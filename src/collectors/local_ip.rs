use crate::collectors::probes::run_command;
use crate::collectors::{with_host, SharedHost};
use crate::config::LocalIpConfig;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time;
use tracing::debug;

pub const LOCAL_IP_UNAVAILABLE: &str = "N/A";

const RESOLVE_TIMEOUT: Duration = Duration::from_millis(500);
const IFCONFIG_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait LocalIpResolver: Send + Sync {
    async fn local_ip(&self) -> Option<IpAddr>;
}

/// Hostname lookup, then a UDP "connect" toward `udp_target`, then `ifconfig`.
pub struct LocalIpChain {
    host: SharedHost,
    udp_target: SocketAddr,
    connect_timeout: Duration,
}

impl LocalIpChain {
    pub fn new(host: SharedHost, udp_target: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            host,
            udp_target,
            connect_timeout,
        }
    }

    pub fn from_config(host: SharedHost, cfg: &LocalIpConfig) -> Self {
        let udp_target = cfg
            .udp_target
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([8, 8, 8, 8], 80)));
        Self::new(host, udp_target, Duration::from_millis(cfg.connect_timeout_ms))
    }

    async fn from_hostname(&self) -> Option<IpAddr> {
        let name = with_host(&self.host, |h| h.host_name()).await.flatten()?;
        let addrs = match time::timeout(RESOLVE_TIMEOUT, lookup_host((name.as_str(), 0))).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(err)) => {
                debug!(host = %name, error = %err, "не удалось разрешить имя хоста");
                return None;
            }
            Err(_elapsed) => {
                debug!(host = %name, "таймаут разрешения имени хоста");
                return None;
            }
        };
        pick_address(addrs.map(|a| a.ip()))
    }

    async fn from_udp_route(&self) -> Option<IpAddr> {
        let bind: SocketAddr = if self.udp_target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await.ok()?;
        match time::timeout(self.connect_timeout, socket.connect(self.udp_target)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(target = %self.udp_target, error = %err, "UDP connect не удался");
                return None;
            }
            Err(_elapsed) => {
                debug!(target = %self.udp_target, "таймаут UDP connect");
                return None;
            }
        }
        let ip = socket.local_addr().ok()?.ip();
        usable(&ip).then_some(ip)
    }

    async fn from_ifconfig(&self) -> Option<IpAddr> {
        match run_command("ifconfig", &[], IFCONFIG_TIMEOUT).await {
            Ok(text) => parse_ifconfig(&text),
            Err(err) => {
                debug!(error = %err, "ifconfig недоступен");
                None
            }
        }
    }
}

#[async_trait]
impl LocalIpResolver for LocalIpChain {
    async fn local_ip(&self) -> Option<IpAddr> {
        if let Some(ip) = self.from_hostname().await {
            return Some(ip);
        }
        if let Some(ip) = self.from_udp_route().await {
            return Some(ip);
        }
        self.from_ifconfig().await
    }
}

fn usable(ip: &IpAddr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified() && !is_link_local_v6(ip)
}

// fe80::/10 is meaningless without a scope id
fn is_link_local_v6(ip: &IpAddr) -> bool {
    matches!(ip, IpAddr::V6(v6) if (v6.segments()[0] & 0xffc0) == 0xfe80)
}

fn pick_address(addrs: impl IntoIterator<Item = IpAddr>) -> Option<IpAddr> {
    let candidates: Vec<IpAddr> = addrs.into_iter().filter(usable).collect();
    candidates
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
}

/// First non-loopback, non-link-local address from `ifconfig`, IPv4 preferred.
pub fn parse_ifconfig(text: &str) -> Option<IpAddr> {
    let addrs = text.lines().filter_map(|line| {
        let mut tokens = line.split_whitespace();
        let kind = tokens.next()?;
        if kind != "inet" && kind != "inet6" {
            return None;
        }
        let raw = tokens.next()?;
        let raw = raw.strip_prefix("addr:").unwrap_or(raw);
        let raw = raw.split('%').next().unwrap_or(raw);
        raw.parse::<IpAddr>().ok()
    });
    pick_address(addrs)
}
