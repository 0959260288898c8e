#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use remit::{config::find_config_file, controller::Remit};
use remit_delivery::PublishOutcome;

/// Publish payment statements and track their delivery
#[derive(Parser, Debug)]
#[command(name = "remit")]
#[command(about = "Payment statement publisher", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the reconciliation loop until interrupted (the default)
    Serve,
    /// Dispatch a single statement read from a RON file
    Publish {
        /// Statement to publish
        statement: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = find_config_file(cli.config.as_deref())?;
    let config_content = std::fs::read_to_string(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config from {}: {}",
            config_path.display(),
            e
        )
    })?;
    let remit = Remit::from_ron(&config_content)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => remit.run().await,
        Command::Publish { statement } => {
            match remit.publish(&statement).await? {
                PublishOutcome::Dispatched {
                    statement_id,
                    delivery_id,
                    channel,
                } => {
                    println!("Statement {statement_id} dispatched by {channel} as delivery {delivery_id}");
                }
                PublishOutcome::Failed {
                    statement_id,
                    delivery_id,
                    reason,
                    fallback,
                } => {
                    println!("Statement {statement_id} delivery {delivery_id} failed: {reason}");
                    if let Some(fallback) = fallback {
                        println!("Postal fallback scheduled as delivery {fallback}");
                    }
                }
                PublishOutcome::Duplicate {
                    document_reference,
                    ..
                } => {
                    println!("Statement {document_reference} has already been published");
                }
            }
            Ok(())
        }
    }
}
