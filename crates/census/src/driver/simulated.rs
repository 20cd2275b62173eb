//! In-memory p2p network for dry runs and tests.
//!
//! A [`SimulatedNetwork`] maps addresses to participants (version, online flag,
//! advertised peers). Each [`SimulatedDriver`] is one vantage point into it
//! with its own connection list and address cache: connecting to a participant
//! adds that participant's advertised peers to the cache, and the peer listing
//! returns the cache. The network can be edited while workers poll it.

use super::{is_connected, Driver, DriverFactory, KnownPeers, PeerConnection};
use crate::config::Network;
use crate::error::DriverError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

fn default_online() -> bool {
    true
}

/// A participant of the simulated network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedPeer {
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_online")]
    pub online: bool,
    /// Addresses this participant advertises to whoever connects to it.
    #[serde(default)]
    pub peers: Vec<String>,
}

impl SimulatedPeer {
    pub fn new(version: impl Into<String>, peers: &[&str]) -> Self {
        Self {
            version: version.into(),
            online: true,
            peers: peers.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SimulatedNetwork {
    participants: RwLock<HashMap<String, SimulatedPeer>>,
    /// Port offset handed to the next vantage point.
    next_port: AtomicU16,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a network description: a JSON object of address -> participant.
    ///
    /// ```json
    /// { "10.0.0.1:18555": { "version": "70002", "peers": ["10.0.0.2:18555"] } }
    /// ```
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let participants: HashMap<String, SimulatedPeer> = serde_json::from_str(json)?;
        Ok(Self {
            participants: RwLock::new(participants),
            next_port: AtomicU16::new(0),
        })
    }

    pub fn insert(&self, address: impl Into<String>, peer: SimulatedPeer) {
        self.participants.write().insert(address.into(), peer);
    }

    /// Flip a participant online or offline. Returns false for unknown addresses.
    pub fn set_online(&self, address: &str, online: bool) -> bool {
        match self.participants.write().get_mut(address) {
            Some(peer) => {
                peer.online = online;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.participants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.read().is_empty()
    }

    /// The participant at `address`, if it exists and is online.
    fn reachable(&self, address: &str) -> Result<SimulatedPeer, DriverError> {
        match self.participants.read().get(address) {
            Some(peer) if peer.online => Ok(peer.clone()),
            _ => Err(DriverError::Unreachable(address.to_string())),
        }
    }

    pub fn factory(self: &Arc<Self>) -> SimulatedFactory {
        SimulatedFactory {
            network: Arc::clone(self),
        }
    }
}

/// Hands out one [`SimulatedDriver`] per worker.
#[derive(Clone, Debug)]
pub struct SimulatedFactory {
    network: Arc<SimulatedNetwork>,
}

impl DriverFactory for SimulatedFactory {
    fn create(&self, network: Network) -> Result<Box<dyn Driver>, DriverError> {
        let offset = self.network.next_port.fetch_add(1, Ordering::Relaxed);
        let port = network
            .default_port()
            .checked_add(1000 + offset)
            .ok_or_else(|| DriverError::Start("out of simulated ports".into()))?;

        Ok(Box::new(SimulatedDriver {
            network: Arc::clone(&self.network),
            listen: format!("127.0.0.1:{}", port),
            running: false,
            connections: Vec::new(),
            addr_cache: BTreeSet::new(),
        }))
    }
}

/// One vantage point into a [`SimulatedNetwork`].
#[derive(Debug)]
pub struct SimulatedDriver {
    network: Arc<SimulatedNetwork>,
    listen: String,
    running: bool,
    connections: Vec<PeerConnection>,
    addr_cache: BTreeSet<String>,
}

impl SimulatedDriver {
    fn ensure_running(&self) -> Result<(), DriverError> {
        if self.running {
            Ok(())
        } else {
            Err(DriverError::NotRunning)
        }
    }
}

#[async_trait]
impl Driver for SimulatedDriver {
    async fn start(&mut self) -> Result<(), DriverError> {
        if self.running {
            return Err(DriverError::Start(format!("{} already running", self.listen)));
        }
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DriverError> {
        self.running = false;
        self.connections.clear();
        self.addr_cache.clear();
        Ok(())
    }

    async fn query_liveness(&mut self, address: &str) -> Result<String, DriverError> {
        self.ensure_running()?;
        Ok(self.network.reachable(address)?.version)
    }

    async fn is_connected_to(&mut self, address: &str) -> Result<bool, DriverError> {
        self.ensure_running()?;
        is_connected(&self.connections, address)
    }

    async fn connect_to(&mut self, address: &str) -> Result<(), DriverError> {
        self.ensure_running()?;
        let target = self.network.reachable(address)?;

        self.connections.push(PeerConnection {
            addr: address.to_string(),
            inbound: false,
        });
        self.addr_cache.extend(target.peers);
        Ok(())
    }

    async fn list_known_peers(&mut self) -> Result<KnownPeers, DriverError> {
        self.ensure_running()?;
        Ok(KnownPeers {
            self_addresses: vec![self.listen.clone()],
            peers: self.addr_cache.iter().cloned().collect(),
        })
    }
}
