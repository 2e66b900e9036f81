//! kube-janitor CLI
//!
//! Queries a node's kube-janitor agent for its latest orphan findings
//! and its health.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{findings, status};
use janitor_lib::models::OrphanKind;

/// kube-janitor CLI
#[derive(Parser)]
#[command(name = "kjctl")]
#[command(author, version, about = "CLI for the kube-janitor orphan container detector", long_about = None)]
pub struct Cli {
    /// Agent endpoint URL (can also be set via KJCTL_API_URL env var)
    #[arg(long, env = "KJCTL_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, value_enum, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show orphan containers found by the latest pass
    Findings {
        /// Filter by kind (orphan-api, orphan-pause, orphan-business)
        #[arg(long, short)]
        kind: Option<OrphanKind>,

        /// Show only containers stopped longer than the staleness threshold
        #[arg(long)]
        aged_only: bool,
    },

    /// Show agent health and readiness
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize client
    let client = client::ApiClient::new(&cli.api_url)?;

    // Execute command
    match cli.command {
        Commands::Findings { kind, aged_only } => {
            findings::show_findings(&client, kind, aged_only, cli.format).await?;
        }
        Commands::Status => {
            status::show_status(&client, cli.format).await?;
        }
    }

    Ok(())
}
