//! Error taxonomy for a reconciliation pass

use std::path::PathBuf;
use std::time::Duration;

/// The container runtime could not be inventoried
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("no supported container runtime socket found (tried {})", format_paths(.tried))]
    NoRuntimeSocket { tried: Vec<PathBuf> },
    #[error("failed to connect to {runtime} at `{}`: {source}", .socket.display())]
    Connect {
        runtime: &'static str,
        socket: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to list {runtime} containers: {source}")]
    List {
        runtime: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// The Kubernetes API snapshot could not be taken
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("node name is not set; export NODE_NAME via the downward API")]
    MissingNodeName,
    #[error("failed to create Kubernetes client: {0}")]
    Client(#[source] kube::Error),
    #[error("failed to list pods on node `{node}`: {source}")]
    Api {
        node: String,
        #[source]
        source: kube::Error,
    },
}

/// A single remediation action failed
#[derive(Debug, thiserror::Error)]
pub enum RemediationError {
    #[error("{runtime} refused to remove container `{container_id}`: {source}")]
    Runtime {
        runtime: &'static str,
        container_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Reasons a whole pass is aborted; no report is published for it
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error("inventory unavailable: {0}")]
    Inventory(#[from] InventoryError),
    #[error("cluster state unavailable: {0}")]
    Cluster(#[from] ClusterError),
    #[error("pass exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl PassError {
    /// Short cause label for logs and metrics
    pub fn cause(&self) -> &'static str {
        match self {
            PassError::Inventory(_) => "inventory",
            PassError::Cluster(_) => "cluster",
            PassError::DeadlineExceeded(_) => "deadline",
        }
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
