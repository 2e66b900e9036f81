//! Kubernetes API view of the pods scheduled to this node

use crate::error::ClusterError;
use crate::models::PodUidSet;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams},
    Client,
};
use tracing::debug;

/// Produces the set of pod UIDs the API schedules to a node
#[async_trait]
pub trait ClusterStateProvider: Send + Sync {
    /// Snapshot the pods on `node_name`. Any failure aborts the pass.
    async fn list_node_pod_uids(&self, node_name: &str) -> Result<PodUidSet, ClusterError>;
}

/// Cluster state read through the Kubernetes API server
pub struct KubeClusterProvider {
    client: Client,
}

impl KubeClusterProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from in-cluster config, falling back to the local kubeconfig
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default().await.map_err(ClusterError::Client)?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ClusterStateProvider for KubeClusterProvider {
    async fn list_node_pod_uids(&self, node_name: &str) -> Result<PodUidSet, ClusterError> {
        if node_name.is_empty() {
            return Err(ClusterError::MissingNodeName);
        }

        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&node_field_selector(node_name));

        let pod_list = pods.list(&params).await.map_err(|source| ClusterError::Api {
            node: node_name.to_string(),
            source,
        })?;

        let uids = pod_uids(pod_list.items);
        debug!(node = %node_name, pods = uids.len(), "Listed pods scheduled to node");
        Ok(uids)
    }
}

fn node_field_selector(node_name: &str) -> String {
    format!("spec.nodeName={}", node_name)
}

fn pod_uids(pods: impl IntoIterator<Item = Pod>) -> PodUidSet {
    pods.into_iter()
        .filter_map(|pod| pod.metadata.uid)
        .filter(|uid| !uid.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(name: &str, uid: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: uid.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_node_field_selector() {
        assert_eq!(node_field_selector("worker-1"), "spec.nodeName=worker-1");
    }

    #[test]
    fn test_pod_uids_skips_missing_uids() {
        let uids = pod_uids(vec![
            pod("a", Some("u1")),
            pod("b", None),
            pod("c", Some("")),
            pod("d", Some("u2")),
        ]);

        assert_eq!(uids.len(), 2);
        assert!(uids.contains("u1"));
        assert!(uids.contains("u2"));
    }
}
