//! Findings CLI command

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use janitor_lib::models::OrphanKind;
use janitor_lib::report::{PassReport, ReportedFinding};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_kind, format_age, print_success, print_warning, short_id, OutputFormat};

/// Row for findings table
#[derive(Tabled)]
struct FindingRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Pod UID")]
    pod_uid: String,
    #[tabled(rename = "Sandbox")]
    sandbox: String,
    #[tabled(rename = "Exited")]
    exited: String,
    #[tabled(rename = "Aged")]
    aged: String,
}

/// Keep the findings matching the requested kind and age
pub fn filter_findings(
    findings: &[ReportedFinding],
    kind: Option<OrphanKind>,
    aged_only: bool,
) -> Vec<ReportedFinding> {
    findings
        .iter()
        .filter(|f| kind.map_or(true, |k| f.kind == k))
        .filter(|f| !aged_only || f.aged)
        .cloned()
        .collect()
}

/// Show the findings of the agent's latest pass
pub async fn show_findings(
    client: &ApiClient,
    kind: Option<OrphanKind>,
    aged_only: bool,
    format: OutputFormat,
) -> Result<()> {
    let Some(report) = client.get_optional::<PassReport>("api/v1/findings").await? else {
        print_warning("The agent has not completed a reconciliation pass yet");
        return Ok(());
    };

    let findings = filter_findings(&report.findings, kind, aged_only);

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&findings)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{}", "Orphan Findings".bold());
            println!("{}", "=".repeat(60));
            println!("Node:    {}", report.node_name.cyan());
            println!("Runtime: {}", report.runtime.as_str().cyan());
            println!(
                "Pass:    #{} at {} ({} containers, {} pods)",
                report.pass_id,
                report.completed_at.format("%Y-%m-%d %H:%M:%S UTC"),
                report.containers_scanned,
                report.known_pods
            );
            println!();

            if findings.is_empty() {
                print_success("No orphan containers found");
                return Ok(());
            }

            let now = Utc::now();
            let rows: Vec<FindingRow> = findings
                .iter()
                .map(|f| FindingRow {
                    kind: color_kind(f.kind),
                    container: short_id(&f.container_id).to_string(),
                    pod_uid: f.pod_uid.clone(),
                    sandbox: short_id(&f.sandbox_id).to_string(),
                    exited: format_age(f.exit_time, now),
                    aged: if f.aged {
                        "yes".red().to_string()
                    } else {
                        "no".to_string()
                    },
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} findings", findings.len());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(id: &str, kind: OrphanKind, aged: bool) -> ReportedFinding {
        ReportedFinding {
            kind,
            container_id: id.to_string(),
            pod_uid: format!("uid-{}", id),
            sandbox_id: String::new(),
            exit_time: aged.then(|| Utc::now() - chrono::Duration::days(2)),
            detected_at: Utc::now(),
            aged,
        }
    }

    #[test]
    fn test_filter_by_kind_and_age() {
        let findings = vec![
            finding("a", OrphanKind::OrphanApi, true),
            finding("b", OrphanKind::OrphanApi, false),
            finding("c", OrphanKind::OrphanPause, true),
        ];

        assert_eq!(filter_findings(&findings, None, false).len(), 3);

        let api = filter_findings(&findings, Some(OrphanKind::OrphanApi), false);
        assert_eq!(api.len(), 2);

        let aged = filter_findings(&findings, None, true);
        let ids: Vec<&str> = aged.iter().map(|f| f.container_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let aged_pause = filter_findings(&findings, Some(OrphanKind::OrphanPause), true);
        assert_eq!(aged_pause.len(), 1);
        assert_eq!(aged_pause[0].container_id, "c");
    }
}
