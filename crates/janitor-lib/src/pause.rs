//! Pod sandbox (pause container) detection
//!
//! Every inventory provider normalizes its containers through [`normalize`]
//! so the same predicate decides `is_pause_container` on every runtime.

use crate::models::{
    ContainerRecord, LABEL_CONTAINER_NAME, LABEL_CRI_CONTAINERD_KIND, LABEL_DOCKER_TYPE,
    LABEL_POD_UID, LABEL_SANDBOX_ID, PAUSE_CONTAINER_NAME,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// Decides whether a runtime container is a pod's infrastructure container
pub trait PauseDetector: Send + Sync {
    fn is_pause(&self, image: &str, labels: &HashMap<String, String>) -> bool;
}

/// Image name contains "pause", or the kubelet named the container "POD"
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageNameHeuristic;

impl PauseDetector for ImageNameHeuristic {
    fn is_pause(&self, image: &str, labels: &HashMap<String, String>) -> bool {
        image.contains("pause")
            || labels
                .get(LABEL_CONTAINER_NAME)
                .is_some_and(|name| name == PAUSE_CONTAINER_NAME)
    }
}

/// Trusts the container type the runtime's CRI layer wrote into the labels
#[derive(Debug, Clone, Copy, Default)]
pub struct SandboxKindLabel;

impl PauseDetector for SandboxKindLabel {
    fn is_pause(&self, _image: &str, labels: &HashMap<String, String>) -> bool {
        labels
            .get(LABEL_CRI_CONTAINERD_KIND)
            .is_some_and(|kind| kind == "sandbox")
            || labels
                .get(LABEL_DOCKER_TYPE)
                .is_some_and(|kind| kind == "podsandbox")
    }
}

/// Configurable choice of pause detector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PauseHeuristic {
    #[default]
    ImageName,
    SandboxLabel,
}

impl PauseHeuristic {
    pub fn detector(self) -> Box<dyn PauseDetector> {
        match self {
            PauseHeuristic::ImageName => Box::new(ImageNameHeuristic),
            PauseHeuristic::SandboxLabel => Box::new(SandboxKindLabel),
        }
    }
}

/// Build a [`ContainerRecord`] from raw runtime data
pub fn normalize(
    id: impl Into<String>,
    image: impl Into<String>,
    labels: HashMap<String, String>,
    runtime: &str,
    exit_time: Option<DateTime<Utc>>,
    detector: &dyn PauseDetector,
) -> ContainerRecord {
    let id = id.into();
    let image = image.into();
    let is_pause_container = detector.is_pause(&image, &labels);
    let pod_uid = labels.get(LABEL_POD_UID).cloned().unwrap_or_default();

    // Sandboxes carry no sandbox-id label on containerd; they are their own sandbox.
    let sandbox_id = match labels.get(LABEL_SANDBOX_ID) {
        Some(sandbox) if !sandbox.is_empty() => sandbox.clone(),
        _ if is_pause_container => id.clone(),
        _ => String::new(),
    };

    ContainerRecord {
        id,
        labels,
        image,
        runtime: runtime.to_string(),
        is_pause_container,
        sandbox_id,
        pod_uid,
        exit_time,
    }
}
