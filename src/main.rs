//! Drive a synthetic concurrent create/lookup workload through the namespace lock manager.
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

mod app_config;
mod bench;
mod trc;

use crate::app_config::Config;
use crate::trc::Trc;

#[derive(Parser)]
#[command(
    version,
    about = "Concurrency benchmark for the nslock namespace lock manager."
)]
struct Args {
    #[arg(short, long, value_parser, help = "Optional path to a config TOML.")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the workload.
    Run {
        /// Override the number of worker threads.
        #[arg(short, long)]
        threads: Option<usize>,

        /// Override the number of operations per worker.
        #[arg(short, long)]
        ops: Option<usize>,
    },

    /// Print the effective configuration as TOML.
    PrintConfig,
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    // Errors use eprintln since tracing isn't initialized yet.
    let mut config = Config::load(args.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });

    Trc::default().init().unwrap_or_else(|e| {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    });

    match args.command.unwrap_or(Command::Run {
        threads: None,
        ops: None,
    }) {
        Command::PrintConfig => match toml::to_string_pretty(&config) {
            Ok(rendered) => print!("{rendered}"),
            Err(e) => {
                error!("Failed to render configuration: {e}");
                std::process::exit(1);
            }
        },
        Command::Run { threads, ops } => {
            if let Some(threads) = threads {
                config.workload.threads = threads;
            }
            if let Some(ops) = ops {
                config.workload.ops_per_thread = ops;
            }
            if let Err(error_messages) = config.validate() {
                error!("Configuration is invalid.");
                for msg in &error_messages {
                    error!(" - {msg}");
                }
                std::process::exit(1);
            }
            if let Err(e) = bench::run(&config) {
                error!("Benchmark failed: {e}");
                std::process::exit(1);
            }
        }
    }
}
