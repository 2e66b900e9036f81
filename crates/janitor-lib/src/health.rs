//! Liveness and readiness state for the agent
//!
//! Each pass stage reports into a named component. A stage that keeps
//! failing pass after pass escalates from degraded to unhealthy, which
//! fails the liveness probe and gets the pod restarted. Readiness flips on
//! once the first pass has been attempted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures after which a degraded component turns unhealthy
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Component names for health tracking
pub mod components {
    pub const INVENTORY: &str = "inventory";
    pub const CLUSTER: &str = "cluster";
    pub const RECONCILER: &str = "reconciler";
    pub const REMEDIATION: &str = "remediation";

    /// Every component the agent registers at startup
    pub const ALL: &[&str] = &[INVENTORY, CLUSTER, RECONCILER, REMEDIATION];
}

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing, but the agent can still make progress
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded => "degraded",
            ComponentStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Last known state of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failures reported in a row since the last success
    #[serde(default)]
    pub consecutive_failures: u32,
    pub updated_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn ok() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Body of the liveness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pass_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pass_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    components: BTreeMap<String, ComponentHealth>,
    last_pass: Option<(u64, DateTime<Utc>)>,
}

/// Shared health state; clones observe the same components
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<State>>,
    failure_threshold: u32,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::with_failure_threshold(DEFAULT_FAILURE_THRESHOLD)
    }

    pub fn with_failure_threshold(failure_threshold: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Register components as healthy
    pub async fn register_all(&self, names: &[&str]) {
        let mut state = self.state.write().await;
        for name in names {
            state
                .components
                .insert((*name).to_string(), ComponentHealth::ok());
        }
    }

    /// Record a success; clears the failure streak
    pub async fn set_healthy(&self, name: &str) {
        let mut state = self.state.write().await;
        state.components.insert(name.to_string(), ComponentHealth::ok());
    }

    /// Record a failure; escalates to unhealthy once the streak reaches the threshold
    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.record_failure(name, message.into(), true).await;
    }

    /// Record a failure that never escalates past degraded
    pub async fn set_degraded_capped(&self, name: &str, message: impl Into<String>) {
        self.record_failure(name, message.into(), false).await;
    }

    async fn record_failure(&self, name: &str, message: String, escalate: bool) {
        let mut state = self.state.write().await;
        let failures = state
            .components
            .get(name)
            .map_or(0, |c| c.consecutive_failures)
            + 1;

        let status = if escalate && failures >= self.failure_threshold {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };

        state.components.insert(
            name.to_string(),
            ComponentHealth {
                status,
                message: Some(message),
                consecutive_failures: failures,
                updated_at: Utc::now(),
            },
        );
    }

    /// Mark a component unhealthy immediately
    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        let mut state = self.state.write().await;
        let failures = state
            .components
            .get(name)
            .map_or(0, |c| c.consecutive_failures);

        state.components.insert(
            name.to_string(),
            ComponentHealth {
                status: ComponentStatus::Unhealthy,
                message: Some(message.into()),
                consecutive_failures: failures + 1,
                updated_at: Utc::now(),
            },
        );
    }

    /// Note that a pass ran to completion or abort; makes the agent ready
    pub async fn record_pass(&self, pass_id: u64) {
        self.state.write().await.last_pass = Some((pass_id, Utc::now()));
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let unhealthy = state
            .components
            .iter()
            .find(|(_, c)| c.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.clone());

        let (ready, reason) = match (state.last_pass, unhealthy) {
            (None, _) => (false, Some("No reconciliation pass has run yet".to_string())),
            (Some(_), Some(name)) => (false, Some(format!("Component '{}' is unhealthy", name))),
            (Some(_), None) => (true, None),
        };

        ReadinessResponse {
            ready,
            reason,
            last_pass_id: state.last_pass.map(|(id, _)| id),
            last_pass_at: state.last_pass.map(|(_, at)| at),
        }
    }
}
