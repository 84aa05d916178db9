//! Reachability probes.
//!
//! A probe answers one question, whether a host responds within a timeout. Every
//! failure mode (timeout, no route, missing socket permission, malformed address) is
//! reported as [`ProbeResult::Unreachable`] with a reason, never as an error.

use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, SurgeError, ICMP};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::Instant;

const PAYLOAD: [u8; 56] = [0; 56];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Reachable { rtt: Duration },
    Unreachable(ProbeFailure),
}

impl ProbeResult {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeFailure {
    #[error("timed out")]
    Timeout,
    #[error("invalid address")]
    InvalidAddress,
    #[error("permission denied")]
    PermissionDenied,
    #[error("no route to host")]
    NoRoute,
    #[error("{0}")]
    Io(String),
}

impl From<&io::Error> for ProbeFailure {
    fn from(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => Self::NoRoute,
            _ => Self::Io(e.to_string()),
        }
    }
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, ip_address: &str, timeout: Duration) -> ProbeResult;
}

fn parse_ip(ip_address: &str) -> Result<IpAddr, ProbeFailure> {
    ip_address
        .trim()
        .parse()
        .map_err(|_| ProbeFailure::InvalidAddress)
}

/// Single ICMP echo per probe.
///
/// Unprivileged ICMP sockets let the kernel rewrite the identifier, so replies are told
/// apart by host and sequence number alone. Every echo takes a fresh sequence number to
/// keep concurrent probes of the same host from colliding.
pub struct IcmpProber {
    v4: Result<Client, ProbeFailure>,
    v6: Result<Client, ProbeFailure>,
    next_ident: AtomicU16,
    next_seq: AtomicU16,
}

impl IcmpProber {
    /// Opens one ICMP socket per address family. A family that cannot be opened is
    /// logged and every probe to it reports the failure.
    pub fn new() -> Self {
        let open = |kind: ICMP, family: &str| {
            Client::new(&Config::builder().kind(kind).build()).map_err(|e| {
                log::error!("could not open ICMP socket for {family}: {e}");
                ProbeFailure::from(&e)
            })
        };
        Self {
            v4: open(ICMP::V4, "ipv4"),
            v6: open(ICMP::V6, "ipv6"),
            next_ident: AtomicU16::new(std::process::id() as u16),
            next_seq: AtomicU16::new(0),
        }
    }

    fn sequence(&self) -> PingSequence {
        PingSequence(self.next_seq.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, ip_address: &str, timeout: Duration) -> ProbeResult {
        let ip = match parse_ip(ip_address) {
            Ok(ip) => ip,
            Err(e) => return ProbeResult::Unreachable(e),
        };
        let socket = if ip.is_ipv4() { &self.v4 } else { &self.v6 };
        let client = match socket {
            Ok(client) => client,
            Err(e) => return ProbeResult::Unreachable(e.clone()),
        };

        let ident = PingIdentifier(self.next_ident.fetch_add(1, Ordering::Relaxed));
        let mut pinger = client.pinger(ip, ident).await;
        pinger.timeout(timeout);

        match pinger.ping(self.sequence(), &PAYLOAD).await {
            Ok((_, rtt)) => ProbeResult::Reachable { rtt },
            Err(SurgeError::Timeout { .. }) => ProbeResult::Unreachable(ProbeFailure::Timeout),
            Err(SurgeError::IOError(e)) => ProbeResult::Unreachable(ProbeFailure::from(&e)),
            Err(e) => ProbeResult::Unreachable(ProbeFailure::Io(e.to_string())),
        }
    }
}

/// Connects to a handful of well-known ports. A finished handshake and an active
/// refusal both prove the host answered.
pub struct TcpProber {
    ports: Vec<u16>,
}

impl TcpProber {
    pub fn new(ports: Vec<u16>) -> Self {
        Self { ports }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, ip_address: &str, timeout: Duration) -> ProbeResult {
        let ip = match parse_ip(ip_address) {
            Ok(ip) => ip,
            Err(e) => return ProbeResult::Unreachable(e),
        };

        let started = Instant::now();
        let mut attempts = JoinSet::new();
        for &port in &self.ports {
            let addr = SocketAddr::new(ip, port);
            attempts.spawn(tokio::time::timeout(timeout, TcpStream::connect(addr)));
        }

        let mut failure = ProbeFailure::Timeout;
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok(Ok(Ok(_))) => return ProbeResult::Reachable { rtt: started.elapsed() },
                Ok(Ok(Err(e))) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    return ProbeResult::Reachable { rtt: started.elapsed() }
                }
                Ok(Ok(Err(e))) => failure = ProbeFailure::from(&e),
                Ok(Err(_elapsed)) => {}
                Err(e) => failure = ProbeFailure::Io(e.to_string()),
            }
        }
        ProbeResult::Unreachable(failure)
    }
}
