//! Running a census and reporting on it.

use crate::config::CliConfig;
use anyhow::{Context, Result};
use census::{Enumerator, Health, Topology};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// What the census found, as printed on exit.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CensusReport {
    pub network: String,
    pub online: usize,
    pub offline: usize,
    pub unknown: usize,
    pub topology: Topology,
}

impl CensusReport {
    pub fn from_census(census: &Enumerator) -> Self {
        let topology = Topology::from_census(census);
        Self {
            network: census.config().network.to_string(),
            online: topology.count(Health::Online),
            offline: topology.count(Health::Offline),
            unknown: topology.count(Health::Unknown),
            topology,
        }
    }
}

/// Human-readable table of the census, one node per line.
pub fn render_table(report: &CensusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} census: {} online, {} offline, {} unknown",
        report.network, report.online, report.offline, report.unknown
    );
    let _ = writeln!(out, "{:<24} {:<8} {:<10} {:>5}  CHECKED", "ADDRESS", "HEALTH", "VERSION", "CONNS");
    for vertex in &report.topology.vertices {
        let node = &vertex.node;
        let checked = match node.checked_ago_ms {
            Some(ms) => humantime::format_duration(Duration::from_secs(ms / 1000)).to_string() + " ago",
            None => "never".to_string(),
        };
        let health = match vertex.health {
            Health::Online => "online",
            Health::Offline => "offline",
            Health::Unknown => "unknown",
        };
        let _ = writeln!(
            out,
            "{:<24} {:<8} {:<10} {:>5}  {}",
            node.address,
            health,
            node.version,
            node.connections.len(),
            checked
        );
    }
    out
}

fn init_tracing(default_level: &str) -> Result<()> {
    let level: LevelFilter = default_level
        .parse()
        .with_context(|| format!("invalid log level '{}'", default_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .try_init()
        .context("failed to install tracing subscriber")
}

impl CliConfig {
    /// Run the census until Ctrl-C (or `--duration`), then print it.
    pub async fn run(self) -> Result<()> {
        init_tracing(&self.log_level)?;

        let network = Arc::new(self.load_network()?);
        info!(participants = network.len(), "loaded simulated network");

        let census = Arc::new(
            Enumerator::new(
                self.seeds.iter().cloned(),
                self.census_config(),
                Arc::new(network.factory()),
            )
            .context("failed to configure census")?,
        );

        info!(network = %self.network, seeds = census.seeds().len(), "starting p2p network census");
        census.start();

        match self.duration {
            Some(limit) => tokio::time::sleep(limit).await,
            None => {
                tokio::signal::ctrl_c()
                    .await
                    .context("failed to listen for Ctrl-C")?;
                info!("shutting down due to interrupt");
            }
        }

        census.stop().await;

        let report = CensusReport::from_census(&census);
        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print!("{}", render_table(&report));
        }
        Ok(())
    }
}
