//! spotgridd — the spotgrid daemon.
//!
//! Loads `spotgrid.toml`, wires the configured cloud and recommender
//! backends into the fleet controller and runs it until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! spotgridd run --config spotgrid.toml
//! spotgridd config --region eu-west-1 > spotgrid.toml
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "spotgridd", about = "Spot fleet lifecycle controller")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller.
    Run {
        /// Path to spotgrid.toml.
        #[arg(long, default_value = "spotgrid.toml")]
        config: PathBuf,

        /// Override controller.check_interval (e.g. "5s").
        #[arg(long)]
        check_interval: Option<String>,

        /// Override controller.workers.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Print a scaffolded configuration.
    Config {
        #[arg(long, default_value = "eu-west-1")]
        region: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Run {
            config,
            check_interval,
            workers,
        } => {
            let overrides = daemon::Overrides {
                check_interval,
                workers,
            };
            daemon::run(&config, overrides).await
        }
        Command::Config { region } => {
            print!("{}", spotgrid_core::FleetConfig::scaffold(&region).to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,spotgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
