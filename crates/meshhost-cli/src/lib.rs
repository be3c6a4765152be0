//! meshhost CLI library
//!
//! Argument parsing, configuration and the in-memory election simulator
//! behind the `meshhost` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::{AppConfig, SimulationConfig};
pub use error::{CliError, Result};
