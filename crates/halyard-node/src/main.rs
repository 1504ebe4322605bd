use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use halyard_consensus::BftConfig;
use halyard_core::{KeyPair, View};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod http;
mod node;
mod pool;
mod simulate;
mod status;
mod transport;

use cli::{Cli, Commands};
use config::{generate_committee, NodeConfig};
use node::Node;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // CLI flag over config file; RUST_LOG over both
    let config_level = match &cli.command {
        Commands::Run { config } => NodeConfig::load(config).ok().map(|c| c.log_level),
        _ => None,
    };
    let level = cli
        .log_level
        .clone()
        .or(config_level)
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { config } => {
            run_node(config).await?;
        }
        Commands::Init {
            validators,
            output,
            base_port,
            epoch_max_view,
        } => {
            init_committee(validators, &output, base_port, epoch_max_view)?;
        }
        Commands::Keygen { output } => {
            generate_keypair(output)?;
        }
        Commands::Status { endpoint } => {
            show_status(&endpoint).await?;
        }
        Commands::Submit {
            endpoint,
            payload,
            hex,
        } => {
            submit_command(&endpoint, payload, hex).await?;
        }
        Commands::Simulate {
            validators,
            duration_secs,
            epoch_max_view,
        } => {
            run_simulation(validators, duration_secs, epoch_max_view).await?;
        }
    }

    Ok(())
}

/// Run a Halyard validator
async fn run_node(config_path: PathBuf) -> Result<()> {
    info!("Loading configuration from {:?}", config_path);

    let config = if config_path.exists() {
        NodeConfig::load(&config_path)?
    } else {
        error!(
            "Configuration file not found: {:?}. Run 'halyard init' to create one.",
            config_path
        );
        return Err(anyhow!("Configuration file not found"));
    };

    let node = Node::new(config)?;
    node.run().await
}

/// Write one configuration per validator of a local committee
fn init_committee(
    validators: usize,
    output: &Path,
    base_port: u16,
    epoch_max_view: Option<u64>,
) -> Result<()> {
    std::fs::create_dir_all(output)?;
    let configs = generate_committee(validators, base_port, &output.join("data"), epoch_max_view)?;

    println!("Generated a committee of {} validators:", configs.len());
    for (i, config) in configs.iter().enumerate() {
        let path = output.join(format!("node-{}.json", i));
        config.save(&path)?;
        println!(
            "  {} -> {} (listening on {})",
            path.display(),
            config.keypair()?.public,
            config.bind_addr
        );
    }

    println!("\nTo start a validator, run:");
    println!("  halyard run --config {}", output.join("node-0.json").display());

    Ok(())
}

/// Generate a new keypair
fn generate_keypair(output: Option<PathBuf>) -> Result<()> {
    let keypair = KeyPair::generate();

    println!("Generated new keypair:");
    println!("  Public key:  {}", keypair.public.to_hex());
    println!("  Secret key:  {}", keypair.secret.to_hex());

    if let Some(path) = output {
        std::fs::write(&path, keypair.secret.to_hex())?;
        info!("Secret key saved to {:?}", path);
    }

    println!("\nWARNING: Keep your secret key safe! Do not share it with anyone.");

    Ok(())
}

/// Show node status
async fn show_status(endpoint: &str) -> Result<()> {
    let url = format!("{}/status", endpoint.trim_end_matches('/'));

    let response = reqwest::get(&url).await?;

    if response.status().is_success() {
        let status: serde_json::Value = response.json().await?;
        println!("Node Status:");
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        error!("Failed to get status: {}", response.status());
    }

    Ok(())
}

/// Submit a command
async fn submit_command(endpoint: &str, payload: String, hex: bool) -> Result<()> {
    let url = format!("{}/commands", endpoint.trim_end_matches('/'));

    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .json(&serde_json::json!({ "payload": payload, "hex": hex }))
        .send()
        .await?;

    let success = response.status().is_success();
    let body: serde_json::Value = response.json().await?;
    if success {
        println!("Command submitted:");
    } else {
        error!("Failed to submit command:");
    }
    println!("{}", serde_json::to_string_pretty(&body)?);

    Ok(())
}

/// Run a committee in process and check it agreed on one history
async fn run_simulation(
    validators: usize,
    duration_secs: u64,
    epoch_max_view: Option<u64>,
) -> Result<()> {
    let report = simulate::simulate(
        validators,
        Duration::from_secs(duration_secs),
        epoch_max_view.map(View),
        BftConfig::default(),
    )
    .await?;

    for (key, commits) in report.validators.iter().zip(&report.commits) {
        let last = commits
            .last()
            .map(|c| format!("epoch {} view {} ({})", c.epoch, c.view, c.vertex.short()))
            .unwrap_or_else(|| "nothing".to_string());
        println!("{}: {} commits, last {}", key.short(), commits.len(), last);
    }

    let agreed = report.check_agreement()?;
    println!("\nAll validators agree on {} committed vertices", agreed);
    Ok(())
}
