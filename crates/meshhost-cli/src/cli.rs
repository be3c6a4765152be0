//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a host election among simulated peers on an in-memory mesh
    Simulate {
        /// Peer ids taking part, comma separated
        #[arg(short, long, value_delimiter = ',', default_value = "alpha,bravo,charlie")]
        peers: Vec<String>,
        /// How long to run, in seconds
        #[arg(short, long, default_value_t = 40)]
        duration: u64,
        /// Silence the elected host after this many seconds
        #[arg(long)]
        silence_host_after: Option<u64>,
        /// Let the silenced host speak again after this many seconds
        #[arg(long, requires = "silence_host_after")]
        restore_after: Option<u64>,
    },
    /// Print the effective configuration as TOML
    Config,
}
