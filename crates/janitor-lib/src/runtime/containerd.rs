//! containerd inventory over the local gRPC socket

use super::{async_trait, meaningful_exit_time, ContainerRemover, InventoryProvider, RuntimeKind};
use crate::error::{InventoryError, RemediationError};
use crate::models::ContainerRecord;
use crate::pause::{normalize, PauseDetector};
use chrono::{DateTime, TimeZone, Utc};
use containerd_client::services::v1::containers_client::ContainersClient;
use containerd_client::services::v1::tasks_client::TasksClient;
use containerd_client::services::v1::{
    DeleteContainerRequest, DeleteTaskRequest, GetRequest, KillRequest, ListContainersRequest,
};
use containerd_client::tonic::metadata::AsciiMetadataValue;
use containerd_client::tonic::transport::Channel;
use containerd_client::tonic::{Code, Request, Status as GrpcStatus};
use containerd_client::types::v1::Status as TaskStatus;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// gRPC metadata key selecting the containerd namespace
const NAMESPACE_HEADER: &str = "containerd-namespace";
const SIGKILL: u32 = 9;
/// How long a forced removal waits for a killed task to stop
const KILL_WAIT_ATTEMPTS: u32 = 20;
const KILL_WAIT_INTERVAL: Duration = Duration::from_millis(250);

/// What a task's status lookup yields
struct TaskState {
    stopped: bool,
    exited_at: Option<DateTime<Utc>>,
}

/// containerd runtime client
pub struct ContainerdRuntime {
    channel: Channel,
    namespace: AsciiMetadataValue,
    detector: Box<dyn PauseDetector>,
}

impl ContainerdRuntime {
    /// Open a channel to the containerd socket
    pub async fn connect(
        socket: &Path,
        namespace: &str,
        detector: Box<dyn PauseDetector>,
    ) -> Result<Self, InventoryError> {
        let namespace =
            AsciiMetadataValue::try_from(namespace).map_err(|e| InventoryError::Connect {
                runtime: "containerd",
                socket: socket.to_path_buf(),
                source: Box::new(e),
            })?;

        let channel = containerd_client::connect(socket)
            .await
            .map_err(|e| InventoryError::Connect {
                runtime: "containerd",
                socket: socket.to_path_buf(),
                source: Box::new(e),
            })?;

        Ok(Self {
            channel,
            namespace,
            detector,
        })
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        request
            .metadata_mut()
            .insert(NAMESPACE_HEADER, self.namespace.clone());
        request
    }

    /// Current task status and exit time, if the container has a task
    async fn task_state(
        &self,
        container_id: &str,
    ) -> Result<Option<TaskState>, GrpcStatus> {
        let response = TasksClient::new(self.channel.clone())
            .get(self.request(GetRequest {
                container_id: container_id.to_string(),
                exec_id: String::new(),
            }))
            .await;

        let process = match response {
            Ok(response) => response.into_inner().process,
            Err(status) if status.code() == Code::NotFound => return Ok(None),
            Err(status) => return Err(status),
        };

        Ok(process.map(|process| TaskState {
            stopped: process.status == TaskStatus::Stopped as i32,
            exited_at: process
                .exited_at
                .and_then(|ts| timestamp_to_utc(ts.seconds, ts.nanos)),
        }))
    }

    /// Stop time of a stopped task; absent when running or unreadable
    async fn exit_time(&self, container_id: &str) -> Option<DateTime<Utc>> {
        match self.task_state(container_id).await {
            Ok(Some(TaskState {
                stopped: true,
                exited_at,
            })) => exited_at,
            Ok(_) => None,
            Err(status) => {
                debug!(
                    container_id = %container_id,
                    error = %status,
                    "Failed to read task status"
                );
                None
            }
        }
    }

    async fn kill_and_wait(&self, container_id: &str) -> Result<(), GrpcStatus> {
        let killed = TasksClient::new(self.channel.clone())
            .kill(self.request(KillRequest {
                container_id: container_id.to_string(),
                exec_id: String::new(),
                signal: SIGKILL,
                all: true,
            }))
            .await;

        match killed {
            Ok(_) => {}
            Err(status) if matches!(status.code(), Code::NotFound | Code::FailedPrecondition) => {
                return Ok(())
            }
            Err(status) => return Err(status),
        }

        for _ in 0..KILL_WAIT_ATTEMPTS {
            match self.task_state(container_id).await? {
                None | Some(TaskState { stopped: true, .. }) => return Ok(()),
                Some(_) => tokio::time::sleep(KILL_WAIT_INTERVAL).await,
            }
        }

        Ok(())
    }

    async fn delete(&self, container_id: &str, force: bool) -> Result<(), GrpcStatus> {
        if force {
            self.kill_and_wait(container_id).await?;
        }

        let deleted = TasksClient::new(self.channel.clone())
            .delete(self.request(DeleteTaskRequest {
                container_id: container_id.to_string(),
            }))
            .await;
        match deleted {
            Ok(_) => {}
            Err(status) if status.code() == Code::NotFound => {}
            Err(status) => return Err(status),
        }

        ContainersClient::new(self.channel.clone())
            .delete(self.request(DeleteContainerRequest {
                id: container_id.to_string(),
            }))
            .await?;

        Ok(())
    }
}

#[async_trait]
impl InventoryProvider for ContainerdRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Containerd
    }

    async fn list(&self) -> Result<Vec<ContainerRecord>, InventoryError> {
        let containers = ContainersClient::new(self.channel.clone())
            .list(self.request(ListContainersRequest { filters: vec![] }))
            .await
            .map_err(|status| InventoryError::List {
                runtime: "containerd",
                source: Box::new(status),
            })?
            .into_inner()
            .containers;

        let mut records = Vec::with_capacity(containers.len());
        for container in containers {
            if container.id.is_empty() {
                debug!("Skipping containerd container without an id");
                continue;
            }
            let exit_time = self.exit_time(&container.id).await;
            records.push(normalize(
                container.id,
                container.image,
                container.labels,
                RuntimeKind::Containerd.as_str(),
                exit_time,
                self.detector.as_ref(),
            ));
        }

        Ok(records)
    }
}

#[async_trait]
impl ContainerRemover for ContainerdRuntime {
    async fn remove(&self, container_id: &str, force: bool) -> Result<(), RemediationError> {
        self.delete(container_id, force)
            .await
            .map_err(|status| RemediationError::Runtime {
                runtime: "containerd",
                container_id: container_id.to_string(),
                source: Box::new(status),
            })
    }
}

/// Convert a protobuf timestamp, dropping zero values
fn timestamp_to_utc(seconds: i64, nanos: i32) -> Option<DateTime<Utc>> {
    let nanos = u32::try_from(nanos).unwrap_or(0);
    Utc.timestamp_opt(seconds, nanos)
        .single()
        .and_then(meaningful_exit_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_to_utc() {
        let time = timestamp_to_utc(1_700_000_000, 500).unwrap();
        assert_eq!(time.timestamp(), 1_700_000_000);
        assert_eq!(time.timestamp_subsec_nanos(), 500);
    }

    #[test]
    fn test_timestamp_to_utc_zero_time() {
        // Go's zero time.Time, as containerd reports for tasks that never exited
        assert_eq!(timestamp_to_utc(-62_135_596_800, 0), None);
        assert_eq!(timestamp_to_utc(0, 0), None);
    }

    #[test]
    fn test_timestamp_to_utc_negative_nanos() {
        let time = timestamp_to_utc(1_700_000_000, -1).unwrap();
        assert_eq!(time.timestamp_subsec_nanos(), 0);
    }
}
