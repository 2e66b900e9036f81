//! Reporting of reconciliation results
//!
//! A completed pass is turned into a [`PassReport`] and handed to every
//! configured [`ReportSink`]. Sinks decide retention; the engine keeps
//! nothing between passes. Aborted passes never reach a sink.

mod log_sink;
mod staleness;

pub use log_sink::LogSink;
pub use staleness::{StalenessClassifier, DEFAULT_STALE_AFTER_SECS};

use crate::models::{Finding, OrphanKind};
use crate::runtime::RuntimeKind;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

/// Externally visible shape of one finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedFinding {
    pub kind: OrphanKind,
    pub container_id: String,
    pub pod_uid: String,
    pub sandbox_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_time: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
    /// Stopped for longer than the staleness threshold
    pub aged: bool,
}

impl ReportedFinding {
    pub fn from_finding(
        finding: &Finding,
        staleness: &StalenessClassifier,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: finding.kind,
            container_id: finding.container.id.clone(),
            pod_uid: finding.container.pod_uid.clone(),
            sandbox_id: finding.container.sandbox_id.clone(),
            exit_time: finding.container.exit_time,
            detected_at: finding.detected_at,
            aged: staleness.is_aged(finding.container.exit_time, now),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.exit_time.is_some()
    }
}

/// Result of one complete reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub pass_id: u64,
    pub node_name: String,
    pub runtime: RuntimeKind,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub containers_scanned: usize,
    pub known_pods: usize,
    pub findings: Vec<ReportedFinding>,
}

impl PassReport {
    /// Number of findings per orphan kind
    pub fn count_by_kind(&self) -> BTreeMap<OrphanKind, usize> {
        let mut counts = BTreeMap::new();
        for finding in &self.findings {
            *counts.entry(finding.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn aged_count(&self) -> usize {
        self.findings.iter().filter(|f| f.aged).count()
    }
}

/// Consumer of completed pass reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, report: &PassReport) -> Result<()>;
}

/// Publishes to several sinks; one failing sink does not stop the rest
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ReportSink>>,
    publish_timeout: Option<Duration>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Arc<dyn ReportSink>) {
        self.sinks.push(sink);
    }

    /// Bound each sink's publish call; a sink that misses it counts as failed
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = Some(timeout);
        self
    }

    /// Publish to every sink and return the names of those that failed
    pub async fn publish_all(&self, report: &PassReport) -> Vec<&'static str> {
        let mut failed = Vec::new();
        for sink in &self.sinks {
            let result = match self.publish_timeout {
                Some(limit) => match tokio::time::timeout(limit, sink.publish(report)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("publish timed out after {:?}", limit)),
                },
                None => sink.publish(report).await,
            };

            if let Err(e) = result {
                failed.push(sink.name());
                warn!(
                    sink = sink.name(),
                    pass_id = report.pass_id,
                    error = %e,
                    "Report sink failed"
                );
            }
        }
        failed
    }
}

#[async_trait]
impl ReportSink for FanoutSink {
    fn name(&self) -> &'static str {
        "fanout"
    }

    async fn publish(&self, report: &PassReport) -> Result<()> {
        let failed = self.publish_all(report).await;
        if !failed.is_empty() {
            anyhow::bail!("sinks failed: {}", failed.join(", "));
        }
        Ok(())
    }
}

/// Keeps the most recent report for the HTTP API
#[derive(Debug, Clone, Default)]
pub struct LatestReport {
    inner: Arc<RwLock<Option<PassReport>>>,
}

impl LatestReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<PassReport> {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl ReportSink for LatestReport {
    fn name(&self) -> &'static str {
        "latest"
    }

    async fn publish(&self, report: &PassReport) -> Result<()> {
        *self.inner.write().await = Some(report.clone());
        Ok(())
    }
}
