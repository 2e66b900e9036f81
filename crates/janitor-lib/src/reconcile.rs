//! Reconciliation engine
//!
//! Cross-references the runtime's containers against the pods the
//! Kubernetes API schedules to this node and classifies the leftovers:
//!
//! 1. Index pod sandboxes by pod UID.
//! 2. Drop every pod the API knows about.
//! 3. For each remaining pod, every workload container is `orphan-api`;
//!    a sandbox with no workload at all is `orphan-pause`.
//!
//! The engine is a pure function of its inputs. It performs no I/O, never
//! fails, and ignores containers without a pod UID.

use crate::models::{ContainerRecord, Finding, OrphanKind, PodUidSet};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

/// Merge rule when several pause containers claim the same pod UID
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxPolicy {
    /// The sandbox observed last replaces earlier ones
    #[default]
    LastWriteWins,
    /// The sandbox observed first is kept
    FirstWins,
}

/// Pod UID -> sandbox container id, built once per pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxIndex {
    sandboxes: BTreeMap<String, String>,
}

impl SandboxIndex {
    /// Index every pause container that claims a pod
    pub fn build(containers: &[ContainerRecord], policy: SandboxPolicy) -> Self {
        let mut sandboxes = BTreeMap::new();

        for container in containers
            .iter()
            .filter(|c| c.is_pause_container && c.is_kubernetes_managed())
        {
            match (sandboxes.entry(container.pod_uid.clone()), policy) {
                (Entry::Vacant(slot), _) => {
                    slot.insert(container.id.clone());
                }
                (Entry::Occupied(mut slot), SandboxPolicy::LastWriteWins) => {
                    slot.insert(container.id.clone());
                }
                (Entry::Occupied(_), SandboxPolicy::FirstWins) => {}
            }
        }

        Self { sandboxes }
    }

    /// Remove the pods the API accounts for
    pub fn forget_known(&mut self, known: &PodUidSet) {
        self.sandboxes.retain(|pod_uid, _| !known.contains(pod_uid));
    }

    pub fn get(&self, pod_uid: &str) -> Option<&str> {
        self.sandboxes.get(pod_uid).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sandboxes
            .iter()
            .map(|(pod, sandbox)| (pod.as_str(), sandbox.as_str()))
    }

    pub fn len(&self) -> usize {
        self.sandboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sandboxes.is_empty()
    }
}

/// Explicit inputs to a reconciliation besides the two snapshots
#[derive(Debug, Clone, Copy)]
pub struct ReconcileContext {
    pub sandbox_policy: SandboxPolicy,
    /// Timestamp stamped onto every finding
    pub detected_at: DateTime<Utc>,
}

impl ReconcileContext {
    pub fn new(sandbox_policy: SandboxPolicy, detected_at: DateTime<Utc>) -> Self {
        Self {
            sandbox_policy,
            detected_at,
        }
    }
}

impl Default for ReconcileContext {
    fn default() -> Self {
        Self::new(SandboxPolicy::default(), Utc::now())
    }
}

/// Classify `containers` against the pods the API knows, stamped now
pub fn reconcile(containers: &[ContainerRecord], known_pod_uids: &PodUidSet) -> Vec<Finding> {
    reconcile_with(&ReconcileContext::default(), containers, known_pod_uids)
}

/// Classify `containers` against the pods the API knows
pub fn reconcile_with(
    ctx: &ReconcileContext,
    containers: &[ContainerRecord],
    known_pod_uids: &PodUidSet,
) -> Vec<Finding> {
    let mut index = SandboxIndex::build(containers, ctx.sandbox_policy);
    index.forget_known(known_pod_uids);

    if index.is_empty() {
        return Vec::new();
    }

    let by_id: HashMap<&str, &ContainerRecord> =
        containers.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut workloads: HashMap<&str, Vec<&ContainerRecord>> = HashMap::new();
    for container in containers
        .iter()
        .filter(|c| !c.is_pause_container && c.is_kubernetes_managed())
    {
        workloads
            .entry(container.pod_uid.as_str())
            .or_default()
            .push(container);
    }

    let mut findings = Vec::new();

    for (pod_uid, sandbox_id) in index.iter() {
        match workloads.get(pod_uid) {
            Some(orphans) => {
                findings.extend(orphans.iter().map(|container| Finding {
                    container: (*container).clone(),
                    kind: OrphanKind::OrphanApi,
                    detected_at: ctx.detected_at,
                }));
            }
            None => {
                if let Some(sandbox) = by_id.get(sandbox_id) {
                    findings.push(Finding {
                        container: (*sandbox).clone(),
                        kind: OrphanKind::OrphanPause,
                        detected_at: ctx.detected_at,
                    });
                }
            }
        }
    }

    findings
}
