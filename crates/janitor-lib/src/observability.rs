//! Observability infrastructure for the janitor
//!
//! Provides:
//! - Prometheus metrics (pass latency, pass outcomes, findings by kind, remediation)
//! - Structured JSON logging with tracing

use crate::models::OrphanKind;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for pass duration (in seconds)
const PASS_DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<JanitorMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct JanitorMetricsInner {
    pass_duration_seconds: Histogram,
    passes_total: IntCounter,
    pass_failures_total: IntCounterVec,
    containers_scanned: IntGauge,
    known_pods: IntGauge,
    findings: IntGaugeVec,
    aged_findings: IntGauge,
    sink_failures_total: IntCounter,
    remediation_actions_total: IntCounterVec,
}

impl JanitorMetricsInner {
    fn new() -> Self {
        Self {
            pass_duration_seconds: register_histogram!(
                "kube_janitor_pass_duration_seconds",
                "Time spent on one reconciliation pass",
                PASS_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register pass_duration_seconds"),

            passes_total: register_int_counter!(
                "kube_janitor_passes_total",
                "Reconciliation passes that completed"
            )
            .expect("Failed to register passes_total"),

            pass_failures_total: register_int_counter_vec!(
                "kube_janitor_pass_failures_total",
                "Reconciliation passes aborted, by cause",
                &["cause"]
            )
            .expect("Failed to register pass_failures_total"),

            containers_scanned: register_int_gauge!(
                "kube_janitor_containers_scanned",
                "Containers reported by the runtime in the last pass"
            )
            .expect("Failed to register containers_scanned"),

            known_pods: register_int_gauge!(
                "kube_janitor_known_pods",
                "Pods the Kubernetes API scheduled to this node in the last pass"
            )
            .expect("Failed to register known_pods"),

            findings: register_int_gauge_vec!(
                "kube_janitor_findings",
                "Orphan findings in the last pass, by kind",
                &["kind"]
            )
            .expect("Failed to register findings"),

            aged_findings: register_int_gauge!(
                "kube_janitor_aged_findings",
                "Findings in the last pass whose container has been stopped past the threshold"
            )
            .expect("Failed to register aged_findings"),

            sink_failures_total: register_int_counter!(
                "kube_janitor_sink_failures_total",
                "Report sink publish failures"
            )
            .expect("Failed to register sink_failures_total"),

            remediation_actions_total: register_int_counter_vec!(
                "kube_janitor_remediation_actions_total",
                "Remediation actions taken, by outcome",
                &["outcome"]
            )
            .expect("Failed to register remediation_actions_total"),
        }
    }
}

/// Janitor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct JanitorMetrics {
    _private: (),
}

impl Default for JanitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl JanitorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(JanitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &JanitorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record a completed pass
    pub fn observe_pass(
        &self,
        duration_secs: f64,
        containers_scanned: usize,
        known_pods: usize,
        findings: &[(OrphanKind, usize)],
        aged: usize,
    ) {
        let inner = self.inner();
        inner.pass_duration_seconds.observe(duration_secs);
        inner.passes_total.inc();
        inner.containers_scanned.set(containers_scanned as i64);
        inner.known_pods.set(known_pods as i64);

        // Reset so kinds absent from this pass read zero
        inner.findings.reset();
        for kind in [OrphanKind::OrphanApi, OrphanKind::OrphanPause] {
            inner.findings.with_label_values(&[kind.as_str()]).set(0);
        }
        for (kind, count) in findings {
            inner
                .findings
                .with_label_values(&[kind.as_str()])
                .set(*count as i64);
        }
        inner.aged_findings.set(aged as i64);
    }

    /// Record an aborted pass
    pub fn inc_pass_failure(&self, cause: &str) {
        self.inner()
            .pass_failures_total
            .with_label_values(&[cause])
            .inc();
    }

    pub fn inc_sink_failures(&self, count: usize) {
        self.inner().sink_failures_total.inc_by(count as u64);
    }

    /// Record a remediation outcome (removed, failed, skipped, dry_run)
    pub fn inc_remediation(&self, outcome: &str) {
        self.inner()
            .remediation_actions_total
            .with_label_values(&[outcome])
            .inc();
    }
}

/// Structured logger for janitor events
///
/// Provides consistent JSON-formatted logging for findings,
/// pass outcomes and remediation actions.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log an orphan workload container
    pub fn log_orphan_container(
        &self,
        kind: OrphanKind,
        container_id: &str,
        pod_uid: &str,
        sandbox_id: &str,
        exit_time: Option<&str>,
        aged_label: Option<&str>,
    ) {
        match (exit_time, aged_label) {
            (Some(exit_time), Some(age)) => {
                warn!(
                    event = "orphan_detected",
                    node = %self.node_name,
                    kind = %kind,
                    container_id = %container_id,
                    pod_uid = %pod_uid,
                    sandbox_id = %sandbox_id,
                    exit_time = %exit_time,
                    "Orphan container over {}",
                    age
                );
            }
            _ => {
                warn!(
                    event = "orphan_detected",
                    node = %self.node_name,
                    kind = %kind,
                    container_id = %container_id,
                    pod_uid = %pod_uid,
                    sandbox_id = %sandbox_id,
                    exit_time = ?exit_time,
                    "Orphan container"
                );
            }
        }
    }

    /// Log an orphan sandbox with no workload container
    pub fn log_orphan_sandbox(&self, pod_uid: &str, sandbox_id: &str, exit_time: Option<&str>) {
        warn!(
            event = "orphan_detected",
            node = %self.node_name,
            kind = %OrphanKind::OrphanPause,
            pod_uid = %pod_uid,
            sandbox_id = %sandbox_id,
            exit_time = ?exit_time,
            "Pause container without business container and not found in K8s"
        );
    }

    /// Log the summary of a completed pass
    pub fn log_pass_complete(
        &self,
        pass_id: u64,
        runtime: &str,
        containers_scanned: usize,
        known_pods: usize,
        findings: usize,
        duration_ms: u128,
    ) {
        info!(
            event = "pass_complete",
            node = %self.node_name,
            pass_id = pass_id,
            runtime = %runtime,
            containers_scanned = containers_scanned,
            known_pods = known_pods,
            findings = findings,
            duration_ms = duration_ms,
            "Reconciliation pass complete"
        );
    }

    /// Log an aborted pass
    pub fn log_pass_aborted(&self, pass_id: u64, cause: &str, error: &str) {
        error!(
            event = "pass_aborted",
            node = %self.node_name,
            pass_id = pass_id,
            cause = %cause,
            error = %error,
            "Reconciliation pass aborted"
        );
    }

    /// Log a remediation decision or its outcome
    pub fn log_remediation(
        &self,
        container_id: &str,
        kind: OrphanKind,
        action: &str,
        detail: &str,
        success: bool,
    ) {
        if success {
            info!(
                event = "remediation",
                node = %self.node_name,
                container_id = %container_id,
                kind = %kind,
                action = %action,
                detail = %detail,
                "Remediation action"
            );
        } else {
            warn!(
                event = "remediation_failed",
                node = %self.node_name,
                container_id = %container_id,
                kind = %kind,
                action = %action,
                detail = %detail,
                "Remediation action failed"
            );
        }
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, runtime: &str, dry_run: bool, force: bool) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            runtime = %runtime,
            dry_run = dry_run,
            force = force,
            "kube-janitor started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "kube-janitor shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_janitor_metrics_creation() {
        let metrics = JanitorMetrics::new();

        metrics.observe_pass(0.2, 12, 4, &[(OrphanKind::OrphanApi, 2)], 1);
        metrics.inc_pass_failure("cluster");
        metrics.inc_sink_failures(1);
        metrics.inc_remediation("dry_run");

        // A second handle shares the registered metrics
        let again = JanitorMetrics::new();
        again.observe_pass(0.1, 0, 0, &[], 0);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name(), "test-node");
    }
}
