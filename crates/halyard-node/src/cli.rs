use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Halyard - a HotStuff-style BFT replication node
#[derive(Parser)]
#[command(name = "halyard")]
#[command(about = "Halyard validator node and utilities")]
#[command(version)]
pub struct Cli {
    /// Log filter (overrides the config file; RUST_LOG overrides both)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a validator
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "halyard.json")]
        config: PathBuf,
    },

    /// Write one configuration file per validator of a local committee
    Init {
        /// Number of validators
        #[arg(short, long, default_value = "4")]
        validators: usize,

        /// Directory the configuration files are written to
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Port of the first validator; the others use the following ports
        #[arg(long, default_value = "9100")]
        base_port: u16,

        /// Close each epoch once this view is reached
        #[arg(long)]
        epoch_max_view: Option<u64>,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file for secret key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show node status
    Status {
        /// Node endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:9100")]
        endpoint: String,
    },

    /// Submit a command for ordering
    Submit {
        /// Node endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:9100")]
        endpoint: String,

        /// Command payload
        #[arg(short, long)]
        payload: String,

        /// Treat payload as hex bytes
        #[arg(long)]
        hex: bool,
    },

    /// Run a committee in this process and check that it agrees
    Simulate {
        /// Number of validators
        #[arg(short, long, default_value = "4")]
        validators: usize,

        /// How long to let the committee run
        #[arg(short, long, default_value = "10")]
        duration_secs: u64,

        /// Close each epoch once this view is reached
        #[arg(long)]
        epoch_max_view: Option<u64>,
    },
}
