//! Test helpers: a scripted driver that records what workers ask of it.
//!
//! A [`MockNetwork`] holds the script (which addresses fail which calls, which
//! peers a target reveals) and the call log. Every [`MockDriver`] created from
//! its factory shares both, so a test can drive several workers and then
//! inspect the combined traffic.

use crate::config::Network;
use crate::driver::{Driver, DriverFactory, KnownPeers};
use crate::error::DriverError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Script {
    version: String,
    peers: HashMap<String, Vec<String>>,
    self_addresses: Vec<String>,
    fail_liveness: HashSet<String>,
    fail_connect: HashSet<String>,
    fail_list_peers: HashSet<String>,
    hang_liveness: HashSet<String>,
    connected: HashSet<String>,
    fail_start: bool,
    /// Number of driver starts that fail before starts succeed.
    failing_starts: usize,
    /// Number of drivers the factory creates before failing.
    create_limit: Option<usize>,
    created: usize,
    starts: usize,
    stops: usize,
    liveness_calls: HashMap<String, usize>,
    connect_calls: HashMap<String, usize>,
}

#[derive(Clone, Debug, Default)]
pub struct MockNetwork {
    script: Arc<Mutex<Script>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        let network = Self::default();
        network.script.lock().version = "70002".into();
        network
    }

    /// Peers revealed by the vantage point after polling `address`.
    pub fn with_peers(self, address: &str, peers: &[&str]) -> Self {
        self.script.lock().peers.insert(
            address.to_string(),
            peers.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    pub fn with_self_addresses(self, addresses: &[&str]) -> Self {
        self.script.lock().self_addresses = addresses.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn fail_liveness(self, address: &str) -> Self {
        self.script.lock().fail_liveness.insert(address.to_string());
        self
    }

    pub fn fail_connect(self, address: &str) -> Self {
        self.script.lock().fail_connect.insert(address.to_string());
        self
    }

    pub fn fail_list_peers(self, address: &str) -> Self {
        self.script.lock().fail_list_peers.insert(address.to_string());
        self
    }

    /// Liveness checks of `address` never complete.
    pub fn hang_liveness(self, address: &str) -> Self {
        self.script.lock().hang_liveness.insert(address.to_string());
        self
    }

    /// Pretend every vantage point is already connected to `address`.
    pub fn already_connected(self, address: &str) -> Self {
        self.script.lock().connected.insert(address.to_string());
        self
    }

    pub fn fail_start(self) -> Self {
        self.script.lock().fail_start = true;
        self
    }

    /// Fail the first `count` driver starts across all vantage points.
    pub fn fail_first_starts(self, count: usize) -> Self {
        self.script.lock().failing_starts = count;
        self
    }

    /// Let the factory create `limit` drivers, then fail.
    pub fn create_limit(self, limit: usize) -> Self {
        self.script.lock().create_limit = Some(limit);
        self
    }

    /// Stop failing liveness checks of `address`.
    pub fn heal(&self, address: &str) {
        let mut script = self.script.lock();
        script.fail_liveness.remove(address);
        script.hang_liveness.remove(address);
    }

    pub fn liveness_calls(&self, address: &str) -> usize {
        self.script.lock().liveness_calls.get(address).copied().unwrap_or(0)
    }

    pub fn total_liveness_calls(&self) -> usize {
        self.script.lock().liveness_calls.values().sum()
    }

    pub fn connect_calls(&self, address: &str) -> usize {
        self.script.lock().connect_calls.get(address).copied().unwrap_or(0)
    }

    pub fn created(&self) -> usize {
        self.script.lock().created
    }

    pub fn starts(&self) -> usize {
        self.script.lock().starts
    }

    pub fn stops(&self) -> usize {
        self.script.lock().stops
    }

    pub fn driver(&self) -> MockDriver {
        MockDriver {
            script: Arc::clone(&self.script),
            target: None,
        }
    }

    pub fn factory(&self) -> Arc<dyn DriverFactory> {
        Arc::new(self.clone())
    }
}

impl DriverFactory for MockNetwork {
    fn create(&self, _network: Network) -> Result<Box<dyn Driver>, DriverError> {
        let mut script = self.script.lock();
        if script.create_limit.is_some_and(|limit| script.created >= limit) {
            return Err(DriverError::Start("no more vantage points".into()));
        }
        script.created += 1;
        drop(script);
        Ok(Box::new(self.driver()))
    }
}

/// A driver that follows a [`MockNetwork`] script.
#[derive(Debug)]
pub struct MockDriver {
    script: Arc<Mutex<Script>>,
    /// Address of the most recent liveness check; decides which peers are listed.
    target: Option<String>,
}

#[async_trait]
impl Driver for MockDriver {
    async fn start(&mut self) -> Result<(), DriverError> {
        let mut script = self.script.lock();
        script.starts += 1;
        if script.fail_start || script.starts <= script.failing_starts {
            return Err(DriverError::Start("scripted failure".into()));
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DriverError> {
        self.script.lock().stops += 1;
        Ok(())
    }

    async fn query_liveness(&mut self, address: &str) -> Result<String, DriverError> {
        let hang = {
            let mut script = self.script.lock();
            *script.liveness_calls.entry(address.to_string()).or_default() += 1;
            if script.fail_liveness.contains(address) {
                return Err(DriverError::Unreachable(address.to_string()));
            }
            script.hang_liveness.contains(address)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        self.target = Some(address.to_string());
        Ok(self.script.lock().version.clone())
    }

    async fn is_connected_to(&mut self, address: &str) -> Result<bool, DriverError> {
        Ok(self.script.lock().connected.contains(address))
    }

    async fn connect_to(&mut self, address: &str) -> Result<(), DriverError> {
        let mut script = self.script.lock();
        *script.connect_calls.entry(address.to_string()).or_default() += 1;
        if script.fail_connect.contains(address) {
            return Err(DriverError::Rpc(format!("addnode {} refused", address)));
        }
        Ok(())
    }

    async fn list_known_peers(&mut self) -> Result<KnownPeers, DriverError> {
        let script = self.script.lock();
        let target = self.target.as_deref().unwrap_or_default();
        if script.fail_list_peers.contains(target) {
            return Err(DriverError::Rpc("getaddrcache failed".into()));
        }
        Ok(KnownPeers {
            self_addresses: script.self_addresses.clone(),
            peers: script.peers.get(target).cloned().unwrap_or_default(),
        })
    }
}
