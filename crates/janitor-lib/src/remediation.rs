//! Remediation of orphan findings
//!
//! The reconciliation engine only reports. Removal is a separate subscriber
//! that receives completed pass reports like any other sink and decides per
//! finding whether to act:
//!
//! - without `force`, only stopped containers past the staleness threshold
//!   are removed; running or recently stopped ones are skipped
//! - `force` bypasses those checks and asks the runtime to force removal
//! - `dry_run` logs what would be removed and never calls the runtime

use crate::models::OrphanKind;
use crate::observability::{JanitorMetrics, StructuredLogger};
use crate::report::{PassReport, ReportSink, ReportedFinding};
use crate::runtime::ContainerRemover;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Runner-owned flags that govern remediation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemediationPolicy {
    pub dry_run: bool,
    pub force: bool,
}

/// What to do with one finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationAction {
    /// Remove the container through the runtime
    Remove {
        container_id: String,
        kind: OrphanKind,
        force: bool,
    },
    /// Would remove, but dry-run is on
    DryRun { container_id: String, kind: OrphanKind },
    /// Left alone
    Skip {
        container_id: String,
        kind: OrphanKind,
        reason: &'static str,
    },
}

/// Decide the action for every finding in a report
pub fn plan(report: &PassReport, policy: RemediationPolicy) -> Vec<RemediationAction> {
    report
        .findings
        .iter()
        .map(|finding| plan_one(finding, policy))
        .collect()
}

fn plan_one(finding: &ReportedFinding, policy: RemediationPolicy) -> RemediationAction {
    let container_id = finding.container_id.clone();
    let kind = finding.kind;

    if !kind.is_orphan() {
        return RemediationAction::Skip {
            container_id,
            kind,
            reason: "not an orphan",
        };
    }

    if !policy.force {
        if !finding.is_stopped() {
            return RemediationAction::Skip {
                container_id,
                kind,
                reason: "container is running; use --force to remove",
            };
        }
        if !finding.aged {
            return RemediationAction::Skip {
                container_id,
                kind,
                reason: "container stopped recently; use --force to remove",
            };
        }
    }

    if policy.dry_run {
        RemediationAction::DryRun { container_id, kind }
    } else {
        RemediationAction::Remove {
            container_id,
            kind,
            force: policy.force,
        }
    }
}

/// Tally of one remediation round
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemediationOutcome {
    pub removed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub dry_run: usize,
}

/// Report sink that removes orphan containers
pub struct Remediator {
    remover: Arc<dyn ContainerRemover>,
    policy: RemediationPolicy,
    logger: StructuredLogger,
    metrics: Option<JanitorMetrics>,
}

impl Remediator {
    /// Name this sink reports under; the runner tracks its health separately
    pub const SINK_NAME: &'static str = "remediation";

    pub fn new(
        remover: Arc<dyn ContainerRemover>,
        policy: RemediationPolicy,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            remover,
            policy,
            logger,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: JanitorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Execute the plan for a report; individual failures do not stop the rest
    pub async fn remediate(&self, report: &PassReport) -> RemediationOutcome {
        let mut outcome = RemediationOutcome::default();

        for action in plan(report, self.policy) {
            match action {
                RemediationAction::Remove {
                    container_id,
                    kind,
                    force,
                } => match self.remover.remove(&container_id, force).await {
                    Ok(()) => {
                        outcome.removed += 1;
                        self.record("removed");
                        self.logger
                            .log_remediation(&container_id, kind, "remove", "removed", true);
                    }
                    Err(e) => {
                        outcome.failed += 1;
                        self.record("failed");
                        self.logger.log_remediation(
                            &container_id,
                            kind,
                            "remove",
                            &e.to_string(),
                            false,
                        );
                    }
                },
                RemediationAction::DryRun { container_id, kind } => {
                    outcome.dry_run += 1;
                    self.record("dry_run");
                    self.logger.log_remediation(
                        &container_id,
                        kind,
                        "dry-run",
                        "would remove",
                        true,
                    );
                }
                RemediationAction::Skip {
                    container_id,
                    kind,
                    reason,
                } => {
                    outcome.skipped += 1;
                    self.record("skipped");
                    self.logger
                        .log_remediation(&container_id, kind, "skip", reason, true);
                }
            }
        }

        outcome
    }

    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_remediation(outcome);
        }
    }
}

#[async_trait]
impl ReportSink for Remediator {
    fn name(&self) -> &'static str {
        Self::SINK_NAME
    }

    async fn publish(&self, report: &PassReport) -> Result<()> {
        let outcome = self.remediate(report).await;
        if outcome.failed > 0 {
            anyhow::bail!(
                "{} of {} removals failed",
                outcome.failed,
                outcome.failed + outcome.removed
            );
        }
        Ok(())
    }
}
