//! Agent status CLI command

use anyhow::Result;
use colored::Colorize;
use janitor_lib::health::{HealthResponse, ReadinessResponse};
use serde::Serialize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, print_info, OutputFormat};

/// Row for component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Failures")]
    failures: u32,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Serialize)]
struct StatusOutput {
    health: HealthResponse,
    readiness: ReadinessResponse,
}

/// Show the agent's health and readiness
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health) = client.get_probe::<HealthResponse>("healthz").await?;
    let (_, readiness) = client.get_probe::<ReadinessResponse>("readyz").await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&StatusOutput { health, readiness })?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{}", "Agent Status".bold());
            println!("{}", "=".repeat(60));
            println!("Endpoint: {}", client.base_url().as_str().cyan());
            println!("Health:   {}", color_status(health.status.as_str()));
            println!(
                "Ready:    {}",
                color_status(if readiness.ready { "ready" } else { "not ready" })
            );
            if let (Some(id), Some(at)) = (readiness.last_pass_id, readiness.last_pass_at) {
                println!(
                    "Last pass: #{} at {}",
                    id,
                    at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            if let Some(reason) = &readiness.reason {
                print_info(reason);
            }
            println!();

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(component.status.as_str()),
                    failures: component.consecutive_failures,
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }

    Ok(())
}
