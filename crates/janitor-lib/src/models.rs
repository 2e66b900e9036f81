//! Core data models for the janitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Label carrying the owning pod's UID
pub const LABEL_POD_UID: &str = "io.kubernetes.pod.uid";
/// Label carrying the pod sandbox id of a workload container
pub const LABEL_SANDBOX_ID: &str = "io.kubernetes.sandbox.id";
/// Label carrying the container name inside the pod spec
pub const LABEL_CONTAINER_NAME: &str = "io.kubernetes.container.name";
/// Container type label written by dockershim / cri-dockerd
pub const LABEL_DOCKER_TYPE: &str = "io.kubernetes.docker.type";
/// Container kind label written by the containerd CRI plugin
pub const LABEL_CRI_CONTAINERD_KIND: &str = "io.cri-containerd.kind";
/// Container name the kubelet gives to pod infrastructure containers
pub const PAUSE_CONTAINER_NAME: &str = "POD";

/// Set of pod UIDs the Kubernetes API reports for this node
pub type PodUidSet = HashSet<String>;

/// One container as seen by the runtime, independent of which runtime produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub labels: HashMap<String, String>,
    pub image: String,
    pub runtime: String,
    pub is_pause_container: bool,
    pub sandbox_id: String,
    pub pod_uid: String,
    pub exit_time: Option<DateTime<Utc>>,
}

impl ContainerRecord {
    /// True if the container claims a Kubernetes pod
    pub fn is_kubernetes_managed(&self) -> bool {
        !self.pod_uid.is_empty()
    }
}

/// Orphan classification vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrphanKind {
    /// Not an orphan
    Healthy,
    /// Workload container whose pod the API does not know, with a local sandbox
    OrphanApi,
    /// Sandbox container whose pod the API does not know and which has no workload
    OrphanPause,
    /// Reserved. No reconciliation rule produces it.
    OrphanBusiness,
}

impl OrphanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrphanKind::Healthy => "healthy",
            OrphanKind::OrphanApi => "orphan-api",
            OrphanKind::OrphanPause => "orphan-pause",
            OrphanKind::OrphanBusiness => "orphan-business",
        }
    }

    pub fn is_orphan(&self) -> bool {
        !matches!(self, OrphanKind::Healthy)
    }
}

impl fmt::Display for OrphanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrphanKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(OrphanKind::Healthy),
            "orphan-api" => Ok(OrphanKind::OrphanApi),
            "orphan-pause" => Ok(OrphanKind::OrphanPause),
            "orphan-business" => Ok(OrphanKind::OrphanBusiness),
            other => Err(format!("unknown orphan kind '{}'", other)),
        }
    }
}

/// Output unit of a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub container: ContainerRecord,
    pub kind: OrphanKind,
    pub detected_at: DateTime<Utc>,
}

impl Finding {
    pub fn container_id(&self) -> &str {
        &self.container.id
    }

    pub fn pod_uid(&self) -> &str {
        &self.container.pod_uid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orphan_kind_wire_names() {
        assert_eq!(OrphanKind::OrphanApi.to_string(), "orphan-api");
        assert_eq!(
            serde_json::to_string(&OrphanKind::OrphanPause).unwrap(),
            "\"orphan-pause\""
        );
        assert_eq!(
            "orphan-business".parse::<OrphanKind>().unwrap(),
            OrphanKind::OrphanBusiness
        );
        assert!("orphan".parse::<OrphanKind>().is_err());
    }

    #[test]
    fn test_healthy_is_not_orphan() {
        assert!(!OrphanKind::Healthy.is_orphan());
        assert!(OrphanKind::OrphanApi.is_orphan());
    }
}
