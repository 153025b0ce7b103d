//! Locating the monitored host and opening an executor to it.
//!
//! Resolution order:
//! 1. A fixed `host` from the configuration, used as-is.
//! 2. DNS lookup of `host_name`, accepted only inside the configured subnet.
//! 3. A parallel scan of `subnet.2 ..= subnet.254` for an open SSH port.
//!
//! The scan fans out over scoped worker threads pulling candidates from a
//! shared index; the first address that answers stops the rest.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::executor::{CommandExecutor, SshExecutor};

/// First and last host octet probed during a subnet scan.
pub const SCAN_RANGE: std::ops::RangeInclusive<u8> = 2..=254;

/// Finds the host and builds executors for it.
pub trait Connector: Send {
    /// Address of the host, or `None` when nothing answered.
    fn discover(&self) -> Option<String>;

    /// Open and validate an executor for `host`.
    fn connect(&self, host: &str) -> Option<Box<dyn CommandExecutor>>;
}

/// Production connector: DNS, then subnet scan, then `ssh`.
#[derive(Debug, Clone)]
pub struct NetworkConnector {
    config: Config,
}

impl NetworkConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn resolve_by_name(&self, prefix: [u8; 3]) -> Option<Ipv4Addr> {
        let addrs = (self.config.host_name.as_str(), self.config.ssh_port)
            .to_socket_addrs()
            .map_err(|e| log::debug!("DNS lookup of {} failed: {e}", self.config.host_name))
            .ok()?;
        addrs
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .find(|ip| ip.octets()[..3] == prefix)
    }

    fn scan_subnet(&self, prefix: [u8; 3]) -> Option<Ipv4Addr> {
        let port = self.config.ssh_port;
        let timeout = self.config.probe_timeout();
        let candidates: Vec<Ipv4Addr> = SCAN_RANGE
            .map(|last| Ipv4Addr::new(prefix[0], prefix[1], prefix[2], last))
            .collect();
        scan(&candidates, self.config.discovery_workers, |ip| {
            probe(SocketAddr::new(IpAddr::V4(ip), port), timeout)
        })
    }
}

impl Connector for NetworkConnector {
    fn discover(&self) -> Option<String> {
        if let Some(host) = &self.config.host {
            return Some(host.clone());
        }

        let Some(prefix) = parse_subnet(&self.config.subnet) else {
            log::error!("invalid subnet {:?}; expected three octets", self.config.subnet);
            return None;
        };

        let start = Instant::now();
        if let Some(ip) = self.resolve_by_name(prefix) {
            log::info!("resolved {} to {ip}", self.config.host_name);
            return Some(ip.to_string());
        }

        log::info!(
            "scanning {}.{}-{} on port {}",
            self.config.subnet,
            SCAN_RANGE.start(),
            SCAN_RANGE.end(),
            self.config.ssh_port
        );
        match self.scan_subnet(prefix) {
            Some(ip) => {
                log::info!("found host at {ip} in {:.1}s", start.elapsed().as_secs_f64());
                Some(ip.to_string())
            }
            None => {
                log::warn!("no host answered on {}.0/24", self.config.subnet);
                None
            }
        }
    }

    fn connect(&self, host: &str) -> Option<Box<dyn CommandExecutor>> {
        let mut executor = SshExecutor::new(host, &self.config);
        match executor.execute("echo ok") {
            Ok(out) if out.trim() == "ok" => {
                log::info!("connected to {}@{host}", self.config.ssh_user);
                Some(Box::new(executor))
            }
            Ok(out) => {
                log::error!("unexpected handshake reply from {host}: {out:?}");
                None
            }
            Err(e) => {
                log::error!("connection to {host} failed: {e}");
                None
            }
        }
    }
}

/// Parse `a.b.c` into three octets.
pub fn parse_subnet(subnet: &str) -> Option<[u8; 3]> {
    let octets: Vec<u8> = subnet
        .trim()
        .trim_end_matches('.')
        .split('.')
        .map(|part| part.parse().ok())
        .collect::<Option<_>>()?;
    <[u8; 3]>::try_from(octets).ok()
}

/// Whether a TCP connection to `addr` opens within `timeout`.
pub fn probe(addr: SocketAddr, timeout: Duration) -> bool {
    TcpStream::connect_timeout(&addr, timeout).is_ok()
}

/// Probe `candidates` with up to `workers` threads; first success wins.
///
/// Workers stop taking new candidates once any probe succeeds. Probes already
/// in flight run to completion and their results are ignored.
pub fn scan<F>(candidates: &[Ipv4Addr], workers: usize, probe: F) -> Option<Ipv4Addr>
where
    F: Fn(Ipv4Addr) -> bool + Sync,
{
    if candidates.is_empty() {
        return None;
    }
    let next = AtomicUsize::new(0);
    let found = AtomicBool::new(false);
    let winner: Mutex<Option<Ipv4Addr>> = Mutex::new(None);
    let workers = workers.clamp(1, candidates.len());

    std::thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| {
                while !found.load(Ordering::Relaxed) {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(&ip) = candidates.get(i) else {
                        break;
                    };
                    if probe(ip) {
                        if let Ok(mut slot) = winner.lock() {
                            if slot.is_none() {
                                *slot = Some(ip);
                            }
                        }
                        found.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            });
        }
    });

    winner.into_inner().ok().flatten()
}
