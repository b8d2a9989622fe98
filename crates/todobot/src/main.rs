// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! todobot - turns chat messages into rows on a todo spreadsheet.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod admin;
mod health;
mod serve;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use todobot_config::model::TodobotConfig;

/// todobot - turns chat messages into rows on a todo spreadsheet.
#[derive(Parser, Debug)]
#[command(name = "todobot", version, about, long_about = None)]
struct Cli {
    /// Load configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run the bot and the delivery queue (default).
    Serve,
    /// List batches that exhausted their delivery attempts.
    DeadLetters {
        /// Output JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Reset a dead-lettered batch so it is delivered again.
    Requeue {
        /// Batch id as shown by `dead-letters`.
        batch_id: String,
    },
    /// Show stored batch counts per state.
    Status {
        /// Output JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&std::path::Path>) -> TodobotConfig {
    let loaded = match path {
        Some(path) => todobot_config::load_and_validate_path(path),
        None => todobot_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            todobot_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve::run_serve(config).await,
        Commands::DeadLetters { json } => admin::run_dead_letters(&config, json).await,
        Commands::Requeue { batch_id } => admin::run_requeue(&config, &batch_id).await,
        Commands::Status { json } => admin::run_status(&config, json).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["todobot"]).unwrap();
        assert_eq!(cli.command.unwrap_or(Commands::Serve), Commands::Serve);
    }

    #[test]
    fn requeue_takes_batch_id() {
        let cli = Cli::try_parse_from(["todobot", "requeue", "b-123"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Requeue {
                batch_id: "b-123".into()
            })
        );
        assert!(Cli::try_parse_from(["todobot", "requeue"]).is_err());
    }

    #[test]
    fn config_flag_is_global() {
        let cli =
            Cli::try_parse_from(["todobot", "status", "--json", "--config", "/tmp/todobot.toml"])
                .unwrap();
        assert_eq!(cli.command, Some(Commands::Status { json: true }));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/todobot.toml")));
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = todobot_config::load_and_validate_str("").expect("defaults should be valid");
        assert_eq!(config.service.health_port, 10000);
        assert_eq!(config.queue.max_batch_size, 10);
    }
}
