//! Vantage-point drivers.
//!
//! A driver owns one running participant of the p2p network (a vantage point)
//! plus its control connection. Workers poll other participants *through* their
//! driver: liveness checks, connection requests and peer listings all go via
//! the vantage point.
//!
//! Every driver call may fail. Failures are reported to the worker and never
//! retried by the driver itself.

pub mod simulated;

pub use simulated::{SimulatedDriver, SimulatedFactory, SimulatedNetwork, SimulatedPeer};

use crate::config::Network;
use crate::error::{DriverError, Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Addresses reported by a vantage point's peer listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KnownPeers {
    /// The vantage point's own listening addresses.
    pub self_addresses: Vec<String>,
    /// Peer addresses the vantage point currently knows about.
    pub peers: Vec<String>,
}

/// One live connection held by a vantage point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerConnection {
    pub addr: String,
    /// Inbound connections carry the remote's ephemeral source port.
    pub inbound: bool,
}

/// Capability a worker uses to reach the p2p network.
#[async_trait]
pub trait Driver: Send {
    /// Bring the vantage point up.
    async fn start(&mut self) -> std::result::Result<(), DriverError>;

    /// Tear the vantage point down.
    async fn stop(&mut self) -> std::result::Result<(), DriverError>;

    /// Liveness check of `address`; returns the version it reports.
    async fn query_liveness(&mut self, address: &str) -> std::result::Result<String, DriverError>;

    /// Whether the vantage point already has a live connection to `address`.
    async fn is_connected_to(&mut self, address: &str) -> std::result::Result<bool, DriverError>;

    /// Ask the vantage point to open a connection to `address`.
    async fn connect_to(&mut self, address: &str) -> std::result::Result<(), DriverError>;

    /// The vantage point's own addresses and its known peers.
    async fn list_known_peers(&mut self) -> std::result::Result<KnownPeers, DriverError>;
}

/// Creates one driver per worker.
pub trait DriverFactory: Send + Sync {
    fn create(&self, network: Network) -> std::result::Result<Box<dyn Driver>, DriverError>;
}

/// Await a driver call, failing with [`Error::Timeout`] if `deadline` passes first.
pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    operation: &'static str,
    call: F,
) -> Result<T>
where
    F: Future<Output = std::result::Result<T, DriverError>>,
{
    match deadline {
        Some(after) => match tokio::time::timeout(after, call).await {
            Ok(outcome) => outcome.map_err(Error::from),
            Err(_) => Err(Error::Timeout { operation, after }),
        },
        None => call.await.map_err(Error::from),
    }
}

/// Host part of `host:port`, `[v6]:port`, or a bare host.
pub fn split_host(addr: &str) -> std::result::Result<&str, DriverError> {
    let malformed = || DriverError::MalformedAddress(addr.to_string());

    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(malformed)?;
        return match tail {
            "" => Ok(host),
            t if t.starts_with(':') => Ok(host),
            _ => Err(malformed()),
        };
    }

    match addr.matches(':').count() {
        0 => Ok(addr),
        1 => addr.split_once(':').map(|(host, _)| host).ok_or_else(malformed),
        _ => Err(malformed()),
    }
}

/// True if both addresses name the same host, ignoring ports.
pub fn same_host(a: &str, b: &str) -> std::result::Result<bool, DriverError> {
    Ok(split_host(a)? == split_host(b)?)
}

/// Whether `target` is among `peers`.
///
/// Exact address matches are tried first; these normally only hit outbound
/// connections. Inbound connections use a dynamically chosen source port, so
/// they are matched on host alone. Two participants behind one IP are
/// therefore indistinguishable here.
pub fn is_connected(peers: &[PeerConnection], target: &str) -> std::result::Result<bool, DriverError> {
    if peers.iter().any(|p| p.addr == target) {
        return Ok(true);
    }

    for peer in peers.iter().filter(|p| p.inbound) {
        if same_host(&peer.addr, target)? {
            return Ok(true);
        }
    }

    Ok(false)
}
