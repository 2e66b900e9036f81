//! kube-janitor - node-local orphan container detector
//!
//! This binary runs as a DaemonSet on each Kubernetes node, comparing the
//! containers the local runtime holds with the pods the API server has
//! scheduled to the node, and reporting the ones nobody owns.

use anyhow::{Context, Result};
use clap::Parser;
use janitor_lib::{
    cluster::KubeClusterProvider,
    health::{components, HealthRegistry},
    observability::{JanitorMetrics, StructuredLogger},
    remediation::Remediator,
    report::{LatestReport, LogSink},
    runner::PassRunnerBuilder,
    runtime::connect_runtime,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Detect containers left behind by pods the Kubernetes API no longer knows
#[derive(Parser, Debug)]
#[command(name = "kube-janitor")]
#[command(version, about)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short = 'c', env = "JANITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Node to reconcile (defaults to NODE_NAME)
    #[arg(long)]
    node_name: Option<String>,

    /// Time between passes, e.g. 90s, 30m, 1h
    #[arg(long, value_parser = parse_interval)]
    interval: Option<Duration>,

    /// Only log actions without performing any cleanup
    #[arg(long)]
    dry_run: bool,

    /// Enable remediation and force removal of running or recently stopped orphans
    #[arg(long)]
    force: bool,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,
}

fn parse_interval(value: &str) -> Result<Duration, String> {
    config::parse_duration(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();

    // Load configuration
    let config = config::AgentConfig::load(args.config.as_deref())?.with_overrides(
        config::Overrides {
            node_name: args.node_name.clone(),
            interval: args.interval,
            dry_run: args.dry_run,
            force: args.force,
        },
    );
    config.validate()?;
    info!(
        node_name = %config.node_name,
        interval_secs = config.interval.as_secs(),
        "Agent configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register_all(components::ALL).await;

    let metrics = JanitorMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    let runtime = connect_runtime(&config.runtime_settings())
        .await
        .context("Failed to connect to container runtime")?;
    let cluster = KubeClusterProvider::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let policy = config.remediation_policy();
    logger.log_startup(
        AGENT_VERSION,
        runtime.kind().as_str(),
        policy.is_some_and(|p| p.dry_run),
        policy.is_some_and(|p| p.force),
    );

    let staleness = config.staleness()?;
    let latest = LatestReport::new();

    let mut builder = PassRunnerBuilder::new()
        .inventory(runtime.inventory())
        .cluster(Arc::new(cluster))
        .sink(Arc::new(LogSink::new(logger.clone(), &staleness)))
        .sink(Arc::new(latest.clone()))
        .health(health_registry.clone())
        .node_name(config.node_name.clone())
        .interval(config.interval)
        .pass_timeout(config.pass_timeout)
        .sandbox_policy(config.sandbox_policy)
        .staleness(staleness);

    if let Some(policy) = policy {
        let remediator = Remediator::new(runtime.remover(), policy, logger.clone())
            .with_metrics(metrics.clone());
        builder = builder.sink(Arc::new(remediator));
    }

    let runner = Arc::new(builder.build()?);

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), latest));

    // Start health, metrics and findings server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    if args.once {
        let result = runner.run_pass().await;
        api_handle.abort();
        return match result {
            Ok(report) => {
                info!(findings = report.findings.len(), "Single pass complete");
                Ok(())
            }
            Err(e) => {
                logger.log_shutdown("single pass aborted");
                Err(e).context("Reconciliation pass failed")
            }
        };
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let runner_handle = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.run(shutdown_rx).await })
    };

    // Wait for shutdown signal
    let reason = shutdown_signal().await;
    logger.log_shutdown(reason);

    let _ = shutdown_tx.send(());
    if let Err(e) = runner_handle.await {
        error!(error = %e, "Reconciliation loop terminated abnormally");
    }
    api_handle.abort();

    info!("Shutting down");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM, returning which one arrived
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT received",
                    _ = term.recv() => "SIGTERM received",
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT received"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT received"
    }
}
