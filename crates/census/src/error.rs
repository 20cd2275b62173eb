//! Error types for the census engine.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for the census engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the census engine.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A driver call failed
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
    /// A driver call did not complete within the configured deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    /// No node with this address is known to the census
    #[error("node with address {0} not found in census")]
    NotFound(String),
    /// Invalid engine configuration
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Errors reported by a vantage-point driver.
///
/// The worker does not distinguish between these when recording a node's
/// state: every variant leaves the polled node offline. The variants only
/// exist so logs say what went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The vantage-point process could not be brought up
    #[error("failed to start vantage point: {0}")]
    Start(String),
    /// The vantage-point process could not be torn down cleanly
    #[error("failed to stop vantage point: {0}")]
    Stop(String),
    /// The vantage point is not running
    #[error("vantage point is not running")]
    NotRunning,
    /// A control-connection request failed
    #[error("rpc failed: {0}")]
    Rpc(String),
    /// The target did not answer
    #[error("{0} is unreachable")]
    Unreachable(String),
    /// An address could not be split into host and port
    #[error("malformed address {0}")]
    MalformedAddress(String),
}
