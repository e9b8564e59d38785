#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # brood
//!
//! A multi-process supervisor for local dev workloads: declare a set of
//! shell commands and their starter policies (run-once, restart-on-exit,
//! watch-and-restart, run-after) in a config file, and `brood` launches,
//! monitors, and cleanly shuts all of them down together.
//!
//! ## Subcommands
//!
//! - `brood run <config>` — execute a configuration
//! - `brood schema` — print the configuration file's JSON schema
//! - `brood version` — print package name and version
//! - `brood supervise <config>` — run `brood run` under a crash-restart
//!   wrapper with exponential backoff

use brood::cli::{self, Cli, Commands};
use clap::Parser;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Run { config_path, dry, verbose } => cli::run(config_path, dry, verbose).await,
        Commands::Schema { plain } => {
            cli::schema(plain);
            0
        }
        Commands::Version => {
            cli::version();
            0
        }
        Commands::Supervise { config_path } => cli::supervise(config_path).await,
    };

    std::process::exit(exit_code);
}
