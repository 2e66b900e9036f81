//! Reconciliation pass runner
//!
//! Drives one pass at a time: inventory, cluster snapshot, reconciliation,
//! then publication to the report sinks. In daemon mode passes run on a
//! fixed interval and never overlap; a pass that outlives its deadline is
//! abandoned and nothing from it is published. Each sink also gets the pass
//! deadline for publishing, so a hung sink cannot stall the loop.

use crate::cluster::ClusterStateProvider;
use crate::error::PassError;
use crate::health::{components, HealthRegistry};
use crate::models::OrphanKind;
use crate::observability::{JanitorMetrics, StructuredLogger};
use crate::reconcile::{reconcile_with, ReconcileContext, SandboxPolicy};
use crate::remediation::Remediator;
use crate::report::{FanoutSink, PassReport, ReportedFinding, StalenessClassifier};
use crate::runtime::InventoryProvider;
use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Configuration for the pass runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Node whose pods are reconciled
    pub node_name: String,
    /// Time between pass starts in daemon mode (default: 1 hour)
    pub interval: Duration,
    /// Deadline for a single pass (default: 5 minutes)
    pub pass_timeout: Duration,
    /// Merge rule for duplicate sandboxes
    pub sandbox_policy: SandboxPolicy,
    /// Age decoration for stopped orphans
    pub staleness: StalenessClassifier,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            interval: Duration::from_secs(60 * 60),
            pass_timeout: Duration::from_secs(5 * 60),
            sandbox_policy: SandboxPolicy::default(),
            staleness: StalenessClassifier::default(),
        }
    }
}

/// Runs reconciliation passes against the node's runtime and the cluster API
pub struct PassRunner {
    inventory: Arc<dyn InventoryProvider>,
    cluster: Arc<dyn ClusterStateProvider>,
    sinks: FanoutSink,
    config: RunnerConfig,
    health: HealthRegistry,
    metrics: JanitorMetrics,
    logger: StructuredLogger,
    next_pass_id: AtomicU64,
}

impl PassRunner {
    /// Create a new runner
    pub fn new(
        inventory: Arc<dyn InventoryProvider>,
        cluster: Arc<dyn ClusterStateProvider>,
        sinks: FanoutSink,
        config: RunnerConfig,
        health: HealthRegistry,
    ) -> Self {
        let logger = StructuredLogger::new(config.node_name.clone());
        let sinks = sinks.with_publish_timeout(config.pass_timeout);
        Self {
            inventory,
            cluster,
            sinks,
            config,
            health,
            metrics: JanitorMetrics::new(),
            logger,
            next_pass_id: AtomicU64::new(1),
        }
    }

    /// Run passes until shutdown is signalled
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            pass_timeout_secs = self.config.pass_timeout.as_secs(),
            "Starting reconciliation loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Awaited inline: the next tick cannot start a pass while this one runs.
                    let _ = self.run_pass().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down reconciliation loop");
                    break;
                }
            }
        }
    }

    /// Execute one pass under the configured deadline and publish its report
    pub async fn run_pass(&self) -> Result<PassReport, PassError> {
        let pass_id = self.next_pass_id.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();

        let result = match tokio::time::timeout(self.config.pass_timeout, self.collect(pass_id))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(PassError::DeadlineExceeded(self.config.pass_timeout)),
        };

        match result {
            Ok(report) => {
                let failed_sinks = self.sinks.publish_all(&report).await;
                if !failed_sinks.is_empty() {
                    self.metrics.inc_sink_failures(failed_sinks.len());
                }

                let counts: Vec<(OrphanKind, usize)> =
                    report.count_by_kind().into_iter().collect();
                self.metrics.observe_pass(
                    start.elapsed().as_secs_f64(),
                    report.containers_scanned,
                    report.known_pods,
                    &counts,
                    report.aged_count(),
                );
                self.mark_pass_healthy(pass_id, &failed_sinks).await;

                Ok(report)
            }
            Err(e) => {
                self.metrics.inc_pass_failure(e.cause());
                self.logger
                    .log_pass_aborted(pass_id, e.cause(), &e.to_string());
                self.mark_pass_failed(pass_id, &e).await;
                Err(e)
            }
        }
    }

    /// Gather both snapshots and classify; no side effects beyond the two queries
    async fn collect(&self, pass_id: u64) -> Result<PassReport, PassError> {
        let started_at = Utc::now();

        let containers = self.inventory.list().await?;
        debug!(
            pass_id = pass_id,
            containers = containers.len(),
            runtime = %self.inventory.kind(),
            "Collected runtime inventory"
        );

        let known = self
            .cluster
            .list_node_pod_uids(&self.config.node_name)
            .await?;
        debug!(pass_id = pass_id, pods = known.len(), "Collected cluster state");

        let ctx = ReconcileContext::new(self.config.sandbox_policy, Utc::now());
        let findings = reconcile_with(&ctx, &containers, &known);

        let completed_at = Utc::now();
        let findings = findings
            .iter()
            .map(|f| ReportedFinding::from_finding(f, &self.config.staleness, completed_at))
            .collect();

        Ok(PassReport {
            pass_id,
            node_name: self.config.node_name.clone(),
            runtime: self.inventory.kind(),
            started_at,
            completed_at,
            containers_scanned: containers.len(),
            known_pods: known.len(),
            findings,
        })
    }

    async fn mark_pass_healthy(&self, pass_id: u64, failed_sinks: &[&'static str]) {
        self.health.set_healthy(components::INVENTORY).await;
        self.health.set_healthy(components::CLUSTER).await;
        self.health.set_healthy(components::RECONCILER).await;
        // A restart cannot free a container the runtime refuses to remove
        if failed_sinks.contains(&Remediator::SINK_NAME) {
            self.health
                .set_degraded_capped(components::REMEDIATION, "remediation sink failed")
                .await;
        } else {
            self.health.set_healthy(components::REMEDIATION).await;
        }
        self.health.record_pass(pass_id).await;
    }

    async fn mark_pass_failed(&self, pass_id: u64, error: &PassError) {
        let component = match error {
            PassError::Inventory(_) => components::INVENTORY,
            PassError::Cluster(_) => components::CLUSTER,
            PassError::DeadlineExceeded(_) => components::RECONCILER,
        };
        self.health.set_degraded(component, error.to_string()).await;
        self.health.record_pass(pass_id).await;
    }
}

/// Builder for creating the pass runner
pub struct PassRunnerBuilder {
    inventory: Option<Arc<dyn InventoryProvider>>,
    cluster: Option<Arc<dyn ClusterStateProvider>>,
    sinks: FanoutSink,
    health: Option<HealthRegistry>,
    config: RunnerConfig,
}

impl PassRunnerBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            inventory: None,
            cluster: None,
            sinks: FanoutSink::new(),
            health: None,
            config: RunnerConfig::default(),
        }
    }

    /// Set the runtime inventory provider
    pub fn inventory(mut self, inventory: Arc<dyn InventoryProvider>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Set the cluster state provider
    pub fn cluster(mut self, cluster: Arc<dyn ClusterStateProvider>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Add a report sink
    pub fn sink(mut self, sink: Arc<dyn crate::report::ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Share a health registry with the HTTP API
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn node_name(mut self, node_name: impl Into<String>) -> Self {
        self.config.node_name = node_name.into();
        self
    }

    /// Set the pass interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the per-pass deadline
    pub fn pass_timeout(mut self, timeout: Duration) -> Self {
        self.config.pass_timeout = timeout;
        self
    }

    pub fn sandbox_policy(mut self, policy: SandboxPolicy) -> Self {
        self.config.sandbox_policy = policy;
        self
    }

    pub fn staleness(mut self, staleness: StalenessClassifier) -> Self {
        self.config.staleness = staleness;
        self
    }

    /// Build the runner
    pub fn build(self) -> Result<PassRunner> {
        let inventory = self
            .inventory
            .ok_or_else(|| anyhow::anyhow!("Inventory provider is required"))?;
        let cluster = self
            .cluster
            .ok_or_else(|| anyhow::anyhow!("Cluster state provider is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Pass interval must be greater than zero");
        }

        Ok(PassRunner::new(
            inventory,
            cluster,
            self.sinks,
            self.config,
            self.health.unwrap_or_default(),
        ))
    }
}

impl Default for PassRunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClusterError, InventoryError};
    use crate::health::ComponentStatus;
    use crate::models::{ContainerRecord, PodUidSet};
    use crate::report::{LatestReport, ReportSink};
    use crate::runtime::{async_trait, RuntimeKind};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    /// Mock inventory for testing
    struct MockInventory {
        containers: Vec<ContainerRecord>,
        fail: bool,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockInventory {
        fn new(containers: Vec<ContainerRecord>) -> Self {
            Self {
                containers,
                fail: false,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(vec![])
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(vec![])
            }
        }
    }

    #[async_trait]
    impl InventoryProvider for MockInventory {
        fn kind(&self) -> RuntimeKind {
            RuntimeKind::Containerd
        }

        async fn list(&self) -> Result<Vec<ContainerRecord>, InventoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(InventoryError::List {
                    runtime: "containerd",
                    source: "connection refused".into(),
                });
            }
            Ok(self.containers.clone())
        }
    }

    /// Mock cluster state for testing
    struct MockCluster {
        pods: Option<PodUidSet>,
    }

    #[async_trait]
    impl ClusterStateProvider for MockCluster {
        async fn list_node_pod_uids(&self, node_name: &str) -> Result<PodUidSet, ClusterError> {
            if node_name.is_empty() {
                return Err(ClusterError::MissingNodeName);
            }
            self.pods.clone().ok_or(ClusterError::MissingNodeName)
        }
    }

    struct CountingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReportSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn publish(&self, _report: &PassReport) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Sink that fails or never returns, under a chosen name
    struct BrokenSink {
        name: &'static str,
        hang: bool,
    }

    #[async_trait]
    impl ReportSink for BrokenSink {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn publish(&self, _report: &PassReport) -> anyhow::Result<()> {
            if self.hang {
                return std::future::pending().await;
            }
            anyhow::bail!("device busy")
        }
    }

    fn record(id: &str, pod_uid: &str, is_pause: bool) -> ContainerRecord {
        ContainerRecord {
            id: id.to_string(),
            labels: HashMap::new(),
            image: if is_pause { "pause:3.9" } else { "app:1" }.to_string(),
            runtime: "containerd".to_string(),
            is_pause_container: is_pause,
            sandbox_id: if is_pause { id.to_string() } else { String::new() },
            pod_uid: pod_uid.to_string(),
            exit_time: None,
        }
    }

    fn known(uids: &[&str]) -> PodUidSet {
        uids.iter().map(|u| u.to_string()).collect()
    }

    #[test]
    fn test_runner_config_default() {
        let config = RunnerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(3600));
        assert_eq!(config.pass_timeout, Duration::from_secs(300));
        assert_eq!(config.sandbox_policy, SandboxPolicy::LastWriteWins);
    }

    #[test]
    fn test_builder_requires_providers() {
        let result = PassRunnerBuilder::new()
            .cluster(Arc::new(MockCluster { pods: None }))
            .build();
        assert!(result.is_err());

        let result = PassRunnerBuilder::new()
            .inventory(Arc::new(MockInventory::new(vec![])))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let result = PassRunnerBuilder::new()
            .inventory(Arc::new(MockInventory::new(vec![])))
            .cluster(Arc::new(MockCluster { pods: None }))
            .interval(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_pass_publishes_findings() {
        let inventory = Arc::new(MockInventory::new(vec![
            record("s1", "u1", true),
            record("w1", "u1", false),
            record("s2", "u2", true),
            record("s3", "u3", true),
        ]));
        let latest = LatestReport::new();
        let health = HealthRegistry::new();
        health.register_all(components::ALL).await;

        let runner = PassRunnerBuilder::new()
            .inventory(inventory)
            .cluster(Arc::new(MockCluster {
                pods: Some(known(&["u3"])),
            }))
            .sink(Arc::new(latest.clone()))
            .health(health.clone())
            .node_name("node-a")
            .build()
            .unwrap();

        let report = runner.run_pass().await.unwrap();

        assert_eq!(report.pass_id, 1);
        assert_eq!(report.node_name, "node-a");
        assert_eq!(report.containers_scanned, 4);
        assert_eq!(report.known_pods, 1);
        let counts = report.count_by_kind();
        assert_eq!(counts[&OrphanKind::OrphanApi], 1);
        assert_eq!(counts[&OrphanKind::OrphanPause], 1);

        assert_eq!(latest.get().await.unwrap(), report);
        assert!(health.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_inventory_failure_aborts_pass() {
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
        });
        let health = HealthRegistry::new();
        health.register_all(components::ALL).await;

        let runner = PassRunnerBuilder::new()
            .inventory(Arc::new(MockInventory::failing()))
            .cluster(Arc::new(MockCluster {
                pods: Some(known(&[])),
            }))
            .sink(sink.clone())
            .health(health.clone())
            .node_name("node-a")
            .build()
            .unwrap();

        let err = runner.run_pass().await.unwrap_err();

        assert!(matches!(err, PassError::Inventory(_)));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        let health = health.health().await;
        assert_eq!(
            health.components[components::INVENTORY].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_cluster_failure_aborts_pass() {
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
        });

        let runner = PassRunnerBuilder::new()
            .inventory(Arc::new(MockInventory::new(vec![record("s1", "u1", true)])))
            .cluster(Arc::new(MockCluster { pods: None }))
            .sink(sink.clone())
            .node_name("")
            .build()
            .unwrap();

        let err = runner.run_pass().await.unwrap_err();

        assert!(matches!(
            err,
            PassError::Cluster(ClusterError::MissingNodeName)
        ));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_deadline() {
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
        });

        let runner = PassRunnerBuilder::new()
            .inventory(Arc::new(MockInventory::slow(Duration::from_secs(60))))
            .cluster(Arc::new(MockCluster {
                pods: Some(known(&[])),
            }))
            .sink(sink.clone())
            .node_name("node-a")
            .pass_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let err = runner.run_pass().await.unwrap_err();

        assert!(matches!(err, PassError::DeadlineExceeded(d) if d == Duration::from_secs(5)));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_sink_does_not_stall_pass() {
        let latest = LatestReport::new();
        let runner = PassRunnerBuilder::new()
            .inventory(Arc::new(MockInventory::new(vec![record("s1", "u1", true)])))
            .cluster(Arc::new(MockCluster {
                pods: Some(known(&[])),
            }))
            .sink(Arc::new(BrokenSink {
                name: Remediator::SINK_NAME,
                hang: true,
            }))
            .sink(Arc::new(latest.clone()))
            .node_name("node-a")
            .pass_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let report = runner.run_pass().await.unwrap();

        assert_eq!(latest.get().await.unwrap(), report);
    }

    #[tokio::test]
    async fn test_remediation_failures_stay_degraded() {
        let health = HealthRegistry::new();
        health.register_all(components::ALL).await;

        let runner = PassRunnerBuilder::new()
            .inventory(Arc::new(MockInventory::new(vec![])))
            .cluster(Arc::new(MockCluster {
                pods: Some(known(&[])),
            }))
            .sink(Arc::new(BrokenSink {
                name: Remediator::SINK_NAME,
                hang: false,
            }))
            .health(health.clone())
            .node_name("node-a")
            .build()
            .unwrap();

        for _ in 0..5 {
            runner.run_pass().await.unwrap();
        }

        let status = health.health().await;
        assert_eq!(status.status, ComponentStatus::Degraded);
        assert_eq!(
            status.components[components::REMEDIATION].consecutive_failures,
            5
        );
        assert!(health.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_other_sink_failure_leaves_remediation_healthy() {
        let health = HealthRegistry::new();
        health.register_all(components::ALL).await;

        let runner = PassRunnerBuilder::new()
            .inventory(Arc::new(MockInventory::new(vec![])))
            .cluster(Arc::new(MockCluster {
                pods: Some(known(&[])),
            }))
            .sink(Arc::new(BrokenSink {
                name: "log",
                hang: false,
            }))
            .health(health.clone())
            .node_name("node-a")
            .build()
            .unwrap();

        runner.run_pass().await.unwrap();

        let status = health.health().await;
        assert_eq!(status.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_pass_ids_increase() {
        let runner = PassRunnerBuilder::new()
            .inventory(Arc::new(MockInventory::new(vec![])))
            .cluster(Arc::new(MockCluster {
                pods: Some(known(&[])),
            }))
            .node_name("node-a")
            .build()
            .unwrap();

        assert_eq!(runner.run_pass().await.unwrap().pass_id, 1);
        assert_eq!(runner.run_pass().await.unwrap().pass_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_passes_never_overlap() {
        let inventory = Arc::new(MockInventory::slow(Duration::from_secs(3)));
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
        });
        let runner = Arc::new(
            PassRunnerBuilder::new()
                .inventory(inventory.clone())
                .cluster(Arc::new(MockCluster {
                    pods: Some(known(&[])),
                }))
                .sink(sink.clone())
                .node_name("node-a")
                .interval(Duration::from_secs(1))
                .build()
                .unwrap(),
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_secs(20)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(inventory.calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(inventory.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(sink.calls.load(Ordering::SeqCst) >= 2);
    }
}
