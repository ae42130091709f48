//! # Fleet Configuration Validator
//!
//! Command-line tool for validating fleet configuration files and environment
//! overrides before starting an index or a worker.

use clap::{Parser, Subcommand};
use fleetlink_core::config::{ConfigLoader, FleetConfig};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate fleet configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON); environment only when omitted
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the whole configuration
    All,

    /// Validate and print one section (index, worker, dispatcher)
    Component { name: String },

    /// Print the effective configuration as JSON
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = load(&cli).and_then(|config| match &cli.command {
        Some(Commands::All) | None => validate_all(&config),
        Some(Commands::Component { name }) => show_component(&config, name),
        Some(Commands::Show) => print_json(&config),
    });

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("❌ {e}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<FleetConfig, Box<dyn std::error::Error>> {
    if let Some(file) = &cli.file {
        println!("Config File: {}", file.display());
    }
    Ok(ConfigLoader::new().with_file(cli.file.as_deref()).load()?)
}

fn validate_all(config: &FleetConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔧 Validating Fleet Configuration");
    println!();
    println!("✅ index");
    println!("   - addr: {}", config.index.addr);
    println!("   - ping period: {}ms", config.index.ping_period_ms);
    println!(
        "   - close evicted connections: {}",
        config.index.close_evicted_connections
    );
    println!("✅ worker");
    println!("   - name: {}", config.worker.name);
    println!("   - addr: {}", config.worker.addr);
    println!("   - messages path: {}", config.worker.messages_path);
    println!("   - peer timeout: {}ms", config.worker.peer_timeout_ms);
    println!("✅ dispatcher");
    println!(
        "   - shutdown timeout: {}ms",
        config.dispatcher.shutdown_timeout_ms
    );
    Ok(())
}

fn show_component(config: &FleetConfig, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let section = match name {
        "index" => serde_json::to_string_pretty(&config.index)?,
        "worker" => serde_json::to_string_pretty(&config.worker)?,
        "dispatcher" => serde_json::to_string_pretty(&config.dispatcher)?,
        other => return Err(format!("unknown component: {other}").into()),
    };
    println!("{section}");
    Ok(())
}

fn print_json(config: &FleetConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
