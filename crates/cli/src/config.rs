//! Command-line flags.

use anyhow::{Context, Result};
use census::{CensusConfig, Network, SimulatedNetwork, SimulatedPeer};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "census", about = "Enumerate the participants of a p2p network")]
pub struct CliConfig {
    /// Seed address to start the census from (repeatable)
    #[arg(short, long = "seed", value_name = "ADDR", required = true)]
    pub seeds: Vec<String>,

    /// Number of census workers to start
    #[arg(short, long, default_value_t = census::config::DEFAULT_WORKERS)]
    pub workers: usize,

    /// Time interval for polling nodes
    #[arg(short, long, default_value = "15s", value_parser = humantime::parse_duration)]
    pub interval: Duration,

    /// p2p network for worker vantage points (mainnet, testnet, regnet, simnet)
    #[arg(long)]
    pub network: Network,

    /// Pause between worker actions
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    pub wait: Duration,

    /// Deadline for each driver call; unset waits indefinitely
    #[arg(long, value_parser = humantime::parse_duration)]
    pub call_timeout: Option<Duration>,

    /// JSON description of the simulated network
    #[arg(short, long, value_name = "FILE")]
    pub topology: Option<PathBuf>,

    /// Stop after this long instead of waiting for Ctrl-C
    #[arg(long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Print the census as JSON on exit
    #[arg(long)]
    pub json: bool,
}

impl CliConfig {
    pub fn census_config(&self) -> CensusConfig {
        CensusConfig {
            interval: self.interval,
            workers: self.workers,
            network: self.network,
            worker_wait: self.wait,
            call_timeout: self.call_timeout,
        }
    }

    /// Load the simulated network, or treat every seed as a lone online
    /// participant when no topology file was given.
    pub fn load_network(&self) -> Result<SimulatedNetwork> {
        match &self.topology {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read topology {}", path.display()))?;
                SimulatedNetwork::from_json(&json)
                    .with_context(|| format!("failed to parse topology {}", path.display()))
            }
            None => {
                let network = SimulatedNetwork::new();
                for seed in &self.seeds {
                    network.insert(seed.as_str(), SimulatedPeer::new("", &[]));
                }
                Ok(network)
            }
        }
    }
}
