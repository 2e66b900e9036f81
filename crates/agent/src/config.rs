//! Agent configuration

use anyhow::{Context, Result};
use janitor_lib::pause::PauseHeuristic;
use janitor_lib::reconcile::SandboxPolicy;
use janitor_lib::remediation::RemediationPolicy;
use janitor_lib::report::StalenessClassifier;
use janitor_lib::runtime::{
    RuntimeSelection, RuntimeSettings, DEFAULT_CONTAINERD_NAMESPACE, DEFAULT_CONTAINERD_SOCKET,
    DEFAULT_DOCKER_SOCKET,
};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "JANITOR";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics/findings
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Time between pass starts
    #[serde(default = "default_interval", deserialize_with = "duration")]
    pub interval: Duration,

    /// Deadline for a single pass
    #[serde(default = "default_pass_timeout", deserialize_with = "duration")]
    pub pass_timeout: Duration,

    /// Age after which a stopped orphan is flagged
    #[serde(default = "default_stale_after", deserialize_with = "duration")]
    pub stale_after: Duration,

    #[serde(default)]
    pub sandbox_policy: SandboxPolicy,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub remediation: RemediationConfig,
}

/// Container runtime connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub selection: RuntimeSelection,

    #[serde(default = "default_docker_socket")]
    pub docker_socket: PathBuf,

    #[serde(default = "default_containerd_socket")]
    pub containerd_socket: PathBuf,

    #[serde(default = "default_containerd_namespace")]
    pub containerd_namespace: String,

    #[serde(default)]
    pub pause_heuristic: PauseHeuristic,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            selection: RuntimeSelection::default(),
            docker_socket: default_docker_socket(),
            containerd_socket: default_containerd_socket(),
            containerd_namespace: default_containerd_namespace(),
            pause_heuristic: PauseHeuristic::default(),
        }
    }
}

/// Remediation settings; nothing is removed unless `enabled`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemediationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force: bool,
}

/// Command-line values that take precedence over file and environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub node_name: Option<String>,
    pub interval: Option<Duration>,
    pub dry_run: bool,
    pub force: bool,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_default()
}

fn default_api_port() -> u16 {
    8080
}

fn default_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_pass_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_stale_after() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_docker_socket() -> PathBuf {
    PathBuf::from(DEFAULT_DOCKER_SOCKET)
}

fn default_containerd_socket() -> PathBuf {
    PathBuf::from(DEFAULT_CONTAINERD_SOCKET)
}

fn default_containerd_namespace() -> String {
    DEFAULT_CONTAINERD_NAMESPACE.to_string()
}

impl AgentConfig {
    /// Load configuration from an optional file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(node_name) = overrides.node_name {
            self.node_name = node_name;
        }
        if let Some(interval) = overrides.interval {
            self.interval = interval;
        }
        // Either flag asks for remediation, so both install the remediation sink
        if overrides.dry_run {
            self.remediation.enabled = true;
            self.remediation.dry_run = true;
        }
        if overrides.force {
            self.remediation.enabled = true;
            self.remediation.force = true;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_name.is_empty() {
            anyhow::bail!("Node name is not set; use --node-name or the NODE_NAME variable");
        }
        if self.interval.is_zero() {
            anyhow::bail!("interval must be greater than zero");
        }
        if self.pass_timeout.is_zero() {
            anyhow::bail!("pass_timeout must be greater than zero");
        }
        Ok(())
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            selection: self.runtime.selection,
            docker_socket: self.runtime.docker_socket.clone(),
            containerd_socket: self.runtime.containerd_socket.clone(),
            containerd_namespace: self.runtime.containerd_namespace.clone(),
            pause_heuristic: self.runtime.pause_heuristic,
        }
    }

    pub fn staleness(&self) -> Result<StalenessClassifier> {
        let threshold = chrono::Duration::from_std(self.stale_after)
            .context("stale_after is out of range")?;
        Ok(StalenessClassifier::new(threshold))
    }

    /// Remediation policy, or `None` when remediation is disabled
    pub fn remediation_policy(&self) -> Option<RemediationPolicy> {
        self.remediation.enabled.then_some(RemediationPolicy {
            dry_run: self.remediation.dry_run,
            force: self.remediation.force,
        })
    }
}

/// Parse durations such as `90s`, `30m`, `1h`, `2d` or bare seconds
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);

    let value: u64 = digits
        .parse()
        .with_context(|| format!("Invalid duration '{}'", input))?;

    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        other => anyhow::bail!("Unknown duration unit '{}' in '{}'", other, input),
    };

    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .with_context(|| format!("Duration '{}' is too large", input))
}

fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
