//! Runtime inventory providers
//!
//! Lists every container the node's runtime knows about (running and
//! stopped) and normalizes them into [`ContainerRecord`]s. Docker and
//! containerd are supported; which one is used is chosen by socket
//! presence unless configured explicitly.

mod containerd;
mod docker;

pub use containerd::ContainerdRuntime;
pub use docker::DockerRuntime;

use crate::error::{InventoryError, RemediationError};
use crate::models::ContainerRecord;
use crate::pause::PauseHeuristic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub use async_trait::async_trait;

/// Default Docker-compatible socket
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";
/// Default containerd socket
pub const DEFAULT_CONTAINERD_SOCKET: &str = "/run/containerd/containerd.sock";
/// containerd namespace the CRI plugin places Kubernetes containers in
pub const DEFAULT_CONTAINERD_NAMESPACE: &str = "k8s.io";

/// Container runtime in use on the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Docker,
    Containerd,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Containerd => "containerd",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured runtime choice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeSelection {
    #[default]
    Auto,
    Docker,
    Containerd,
}

/// Everything needed to construct an inventory provider
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub selection: RuntimeSelection,
    pub docker_socket: PathBuf,
    pub containerd_socket: PathBuf,
    pub containerd_namespace: String,
    pub pause_heuristic: PauseHeuristic,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            selection: RuntimeSelection::Auto,
            docker_socket: PathBuf::from(DEFAULT_DOCKER_SOCKET),
            containerd_socket: PathBuf::from(DEFAULT_CONTAINERD_SOCKET),
            containerd_namespace: DEFAULT_CONTAINERD_NAMESPACE.to_string(),
            pause_heuristic: PauseHeuristic::default(),
        }
    }
}

/// Produces the node's container inventory once per pass
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    fn kind(&self) -> RuntimeKind;

    /// List every container visible to the runtime.
    ///
    /// An unreachable runtime is an error; an empty node is `Ok(vec![])`.
    async fn list(&self) -> Result<Vec<ContainerRecord>, InventoryError>;
}

/// Removes containers on behalf of the remediation sink
#[async_trait]
pub trait ContainerRemover: Send + Sync {
    async fn remove(&self, container_id: &str, force: bool) -> Result<(), RemediationError>;
}

/// A connected runtime client
#[derive(Clone)]
pub enum RuntimeHandle {
    Docker(Arc<DockerRuntime>),
    Containerd(Arc<ContainerdRuntime>),
}

impl RuntimeHandle {
    pub fn kind(&self) -> RuntimeKind {
        match self {
            RuntimeHandle::Docker(_) => RuntimeKind::Docker,
            RuntimeHandle::Containerd(_) => RuntimeKind::Containerd,
        }
    }

    pub fn inventory(&self) -> Arc<dyn InventoryProvider> {
        match self {
            RuntimeHandle::Docker(rt) => rt.clone(),
            RuntimeHandle::Containerd(rt) => rt.clone(),
        }
    }

    pub fn remover(&self) -> Arc<dyn ContainerRemover> {
        match self {
            RuntimeHandle::Docker(rt) => rt.clone(),
            RuntimeHandle::Containerd(rt) => rt.clone(),
        }
    }
}

/// Pick a runtime by socket presence, Docker first
pub fn detect_runtime(
    docker_socket: &Path,
    containerd_socket: &Path,
) -> Result<RuntimeKind, InventoryError> {
    if docker_socket.exists() {
        return Ok(RuntimeKind::Docker);
    }
    if containerd_socket.exists() {
        return Ok(RuntimeKind::Containerd);
    }
    Err(InventoryError::NoRuntimeSocket {
        tried: vec![docker_socket.to_path_buf(), containerd_socket.to_path_buf()],
    })
}

/// Resolve the configured selection and connect to that runtime
pub async fn connect_runtime(settings: &RuntimeSettings) -> Result<RuntimeHandle, InventoryError> {
    let kind = match settings.selection {
        RuntimeSelection::Auto => {
            detect_runtime(&settings.docker_socket, &settings.containerd_socket)?
        }
        RuntimeSelection::Docker => RuntimeKind::Docker,
        RuntimeSelection::Containerd => RuntimeKind::Containerd,
    };

    let detector = settings.pause_heuristic.detector();

    let handle = match kind {
        RuntimeKind::Docker => RuntimeHandle::Docker(Arc::new(
            DockerRuntime::connect(&settings.docker_socket, detector).await?,
        )),
        RuntimeKind::Containerd => RuntimeHandle::Containerd(Arc::new(
            ContainerdRuntime::connect(
                &settings.containerd_socket,
                &settings.containerd_namespace,
                detector,
            )
            .await?,
        )),
    };

    info!(runtime = %kind, "Connected to container runtime");
    Ok(handle)
}

/// Runtimes report "never exited" as a zero timestamp; treat it as absent
fn meaningful_exit_time(time: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (time.timestamp() > 0).then_some(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_detect_runtime_prefers_docker() {
        let dir = TempDir::new().unwrap();
        let docker = dir.path().join("docker.sock");
        let containerd = dir.path().join("containerd.sock");
        std::fs::write(&docker, "").unwrap();
        std::fs::write(&containerd, "").unwrap();

        assert_eq!(
            detect_runtime(&docker, &containerd).unwrap(),
            RuntimeKind::Docker
        );
    }

    #[test]
    fn test_detect_runtime_falls_back_to_containerd() {
        let dir = TempDir::new().unwrap();
        let docker = dir.path().join("docker.sock");
        let containerd = dir.path().join("containerd.sock");
        std::fs::write(&containerd, "").unwrap();

        assert_eq!(
            detect_runtime(&docker, &containerd).unwrap(),
            RuntimeKind::Containerd
        );
    }

    #[test]
    fn test_detect_runtime_without_sockets() {
        let dir = TempDir::new().unwrap();
        let result = detect_runtime(&dir.path().join("a.sock"), &dir.path().join("b.sock"));

        assert!(matches!(
            result,
            Err(InventoryError::NoRuntimeSocket { ref tried }) if tried.len() == 2
        ));
    }

    #[test]
    fn test_meaningful_exit_time() {
        let zero = Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(meaningful_exit_time(zero), None);

        let real = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(meaningful_exit_time(real), Some(real));
    }

    #[test]
    fn test_runtime_settings_default() {
        let settings = RuntimeSettings::default();
        assert_eq!(settings.selection, RuntimeSelection::Auto);
        assert_eq!(settings.docker_socket, PathBuf::from("/var/run/docker.sock"));
        assert_eq!(
            settings.containerd_socket,
            PathBuf::from("/run/containerd/containerd.sock")
        );
        assert_eq!(settings.containerd_namespace, "k8s.io");
    }
}
