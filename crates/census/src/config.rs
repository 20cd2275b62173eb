//! Census engine configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How often each node is re-polled unless configured otherwise.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

/// How long workers pause between actions (ticks, bootstrap passes).
pub const DEFAULT_WORKER_WAIT: Duration = Duration::from_secs(5);

/// Upper bound for every configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Default number of polling workers.
pub const DEFAULT_WORKERS: usize = 2;

/// The p2p network that worker vantage points join.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    /// Regression test network
    Regnet,
    #[default]
    Simnet,
}

impl Network {
    /// Default p2p listening port for this network.
    pub fn default_port(&self) -> u16 {
        match self {
            Network::Mainnet => 8333,
            Network::Testnet => 18333,
            Network::Regnet => 18444,
            Network::Simnet => 18555,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regnet => "regnet",
            Network::Simnet => "simnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "regnet" | "regtest" => Ok(Network::Regnet),
            "simnet" => Ok(Network::Simnet),
            other => Err(Error::InvalidConfig(format!(
                "unknown network '{}' (expected mainnet, testnet, regnet or simnet)",
                other
            ))),
        }
    }
}

/// Tunables for an [`Enumerator`](crate::Enumerator).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CensusConfig {
    /// A node is re-polled once its last check is older than this.
    pub interval: Duration,
    /// Number of polling workers, each with its own vantage point.
    pub workers: usize,
    /// Network the vantage points join.
    pub network: Network,
    /// Worker tick period, also the pause between seed bootstrap passes.
    pub worker_wait: Duration,
    /// Deadline applied to each driver call. `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
}

impl Default for CensusConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            workers: DEFAULT_WORKERS,
            network: Network::default(),
            worker_wait: DEFAULT_WORKER_WAIT,
            call_timeout: None,
        }
    }
}

impl CensusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".into()));
        }
        if self.interval.is_zero() {
            return Err(Error::InvalidConfig("interval must be non-zero".into()));
        }
        if self.worker_wait.is_zero() {
            return Err(Error::InvalidConfig("worker wait must be non-zero".into()));
        }
        if self.call_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidConfig("call timeout must be non-zero".into()));
        }
        let longest = [Some(self.interval), Some(self.worker_wait), self.call_timeout]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or_default();
        if longest > MAX_DURATION {
            return Err(Error::InvalidConfig(format!(
                "durations must not exceed {}s",
                MAX_DURATION.as_secs()
            )));
        }
        Ok(())
    }
}
