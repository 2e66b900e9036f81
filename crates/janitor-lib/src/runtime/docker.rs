//! Docker Engine inventory over the local unix socket

use super::{async_trait, meaningful_exit_time, ContainerRemover, InventoryProvider, RuntimeKind};
use crate::error::{InventoryError, RemediationError};
use crate::models::ContainerRecord;
use crate::pause::{normalize, PauseDetector};
use bollard::container::{InspectContainerOptions, ListContainersOptions, RemoveContainerOptions};
use bollard::models::ContainerSummary;
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::debug;

/// Request timeout handed to the Docker client, in seconds
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Docker runtime client
pub struct DockerRuntime {
    docker: Docker,
    detector: Box<dyn PauseDetector>,
}

impl DockerRuntime {
    /// Connect to the Docker socket and verify it answers
    pub async fn connect(
        socket: &Path,
        detector: Box<dyn PauseDetector>,
    ) -> Result<Self, InventoryError> {
        let connect_error = |source: bollard::errors::Error| InventoryError::Connect {
            runtime: "docker",
            socket: socket.to_path_buf(),
            source: Box::new(source),
        };

        let docker = Docker::connect_with_unix(
            &socket.to_string_lossy(),
            DOCKER_TIMEOUT_SECS,
            API_DEFAULT_VERSION,
        )
        .map_err(connect_error)?;
        docker.ping().await.map_err(connect_error)?;

        Ok(Self { docker, detector })
    }

    /// Stop time of an exited container; absent when it cannot be read
    async fn exit_time(&self, container_id: &str) -> Option<DateTime<Utc>> {
        match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect
                .state
                .and_then(|state| state.finished_at)
                .as_deref()
                .and_then(parse_finished_at),
            Err(e) => {
                debug!(container_id = %container_id, error = %e, "Failed to inspect container");
                None
            }
        }
    }

    async fn record_from_summary(&self, summary: ContainerSummary) -> Option<ContainerRecord> {
        let id = summary.id?;
        let exit_time = if summary.state.as_deref() == Some("exited") {
            self.exit_time(&id).await
        } else {
            None
        };

        Some(normalize(
            id,
            summary.image.unwrap_or_default(),
            summary.labels.unwrap_or_default(),
            RuntimeKind::Docker.as_str(),
            exit_time,
            self.detector.as_ref(),
        ))
    }
}

#[async_trait]
impl InventoryProvider for DockerRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Docker
    }

    async fn list(&self) -> Result<Vec<ContainerRecord>, InventoryError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| InventoryError::List {
                runtime: "docker",
                source: Box::new(e),
            })?;

        let mut records = Vec::with_capacity(summaries.len());
        for summary in summaries {
            match self.record_from_summary(summary).await {
                Some(record) => records.push(record),
                None => debug!("Skipping Docker container without an id"),
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl ContainerRemover for DockerRuntime {
    async fn remove(&self, container_id: &str, force: bool) -> Result<(), RemediationError> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| RemediationError::Runtime {
                runtime: "docker",
                container_id: container_id.to_string(),
                source: Box::new(e),
            })
    }
}

/// Parse Docker's `State.FinishedAt`
fn parse_finished_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
        .and_then(meaningful_exit_time)
}
