//! Racelink CLI - try the race link from two terminals or two machines
//!
//! # Commands
//!
//! - `racelink display` - Advertise, accept a controller, stream race state
//! - `racelink controller` - Find a Display, join it, stream joystick input
//! - `racelink config` - Print the effective configuration
//!
//! # Usage
//!
//! ```bash
//! # Machine A
//! racelink display --name "Living Room"
//!
//! # Machine B
//! racelink controller --name "Phone" --auto-invite
//!
//! # Same machine, no broadcast
//! racelink display --port 47821
//! racelink controller --target 127.0.0.1:47821 --auto-invite
//! ```
//!
//! Set `RUST_LOG=racelink_core=debug` to watch the protocol.

mod common;
mod controller;
mod display;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Racelink CLI - local race networking playground
#[derive(Parser)]
#[command(name = "racelink")]
#[command(about = "Run a racelink Display or Controller from the terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a race and wait for a controller
    Display(display::DisplayArgs),

    /// Join a Display and drive it
    Controller(controller::ControllerArgs),

    /// Print the configuration that would be used, as TOML
    Config(common::NetArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Display(args) => display::execute(args),
        Commands::Controller(args) => controller::execute(args),
        Commands::Config(args) => common::print_config(&args),
    }
}
