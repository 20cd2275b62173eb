//! Census enumeration of a peer-to-peer network.
//!
//! This crate discovers the participants of a p2p network and keeps a live,
//! queryable map of them:
//! - Node records with an exclusive polling lease
//! - A registry and scheduler (the [`Enumerator`])
//! - A fixed pool of polling workers, each with its own vantage point
//! - The driver capability workers poll through
//! - A connectivity view for dashboards
//!
//! ```no_run
//! use census::{CensusConfig, Enumerator, SimulatedNetwork};
//! use std::sync::Arc;
//!
//! # async fn run() -> census::Result<()> {
//! let network = Arc::new(SimulatedNetwork::new());
//! let census = Arc::new(Enumerator::new(
//!     ["10.0.0.1:18555"],
//!     CensusConfig::default(),
//!     Arc::new(network.factory()),
//! )?);
//! census.start();
//! // ... query census.nodes() ...
//! census.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod enumerator;
pub mod error;
pub mod node;
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod topology;
pub mod worker;

pub use config::{CensusConfig, Network};
pub use driver::{Driver, DriverFactory, KnownPeers, SimulatedNetwork, SimulatedPeer};
pub use enumerator::{Enumerator, WorkerNotification};
pub use error::{DriverError, Error, Result};
pub use node::{all_fresh, Lease, Node, NodeFields, NodeSnapshot};
pub use topology::{Health, Topology};
pub use worker::{Worker, WorkerStatus};
