//! Drive the namespace cache from scenario files.
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{debug, error, info};

mod app_config;
mod replay;
mod trc;

use crate::app_config::Config;
use crate::trc::Trc;

#[derive(Parser)]
#[command(
    version,
    about = "Client-side namespace cache for a network filesystem redirector."
)]
struct Args {
    #[arg(
        short,
        long,
        value_parser,
        help = "Optional path to a redir-cache config TOML."
    )]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a scenario, walk its paths and deliver its invalidations.
    Replay {
        /// Path to the scenario TOML.
        scenario: PathBuf,
    },

    /// Validate the configuration and print the effective settings.
    CheckConfig,
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    // Load config first so log settings are available for tracing init.
    // Errors use eprintln since tracing isn't initialized yet.
    let config = Config::load_or_default(args.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });

    Trc::from_config(&config.log).init().unwrap_or_else(|e| {
        eprintln!(
            "Failed to initialize logging. Without logging, we can't provide any useful error \
             messages, so we have to exit: {e}"
        );
        std::process::exit(1);
    });

    match args.command {
        Command::CheckConfig => match config.to_toml() {
            Ok(rendered) => {
                info!("Configuration is valid.");
                print!("{rendered}");
            }
            Err(e) => {
                error!("Failed to render configuration: {e}");
                std::process::exit(1);
            }
        },
        Command::Replay { scenario } => {
            debug!(config = ?config, "Replaying with configuration...");
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .unwrap_or_else(|e| {
                    error!("Failed to create Tokio runtime: {e}");
                    std::process::exit(1);
                });
            match runtime.block_on(replay::run(&scenario, config.cache_options())) {
                Ok(summary) => println!("{summary}"),
                Err(e) => {
                    error!("Replay failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
