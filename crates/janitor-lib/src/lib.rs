//! Node-local orphan container detection for Kubernetes
//!
//! This crate provides the core functionality for:
//! - Container inventory from Docker or containerd
//! - Pod snapshots from the Kubernetes API, scoped to one node
//! - Reconciliation of the two into orphan findings
//! - Report sinks (structured logs, HTTP snapshot, remediation)
//! - Health checks and observability

pub mod cluster;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod pause;
pub mod reconcile;
pub mod remediation;
pub mod report;
pub mod runner;
pub mod runtime;

pub use error::{ClusterError, InventoryError, PassError, RemediationError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{JanitorMetrics, StructuredLogger};
pub use reconcile::{reconcile, reconcile_with, ReconcileContext, SandboxPolicy};
pub use report::{PassReport, ReportedFinding};
pub use runner::{PassRunner, PassRunnerBuilder, RunnerConfig};
