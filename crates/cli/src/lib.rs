//! Command-line front end for the census engine.
//!
//! Provides:
//! - Flag parsing into a census configuration
//! - Logging setup
//! - Running a census over a simulated network until interrupted
//! - Printing the resulting census as a table or JSON

pub mod commands;
pub mod config;

pub use commands::{render_table, CensusReport};
pub use config::CliConfig;
