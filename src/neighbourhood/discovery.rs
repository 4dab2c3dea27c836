//! Candidate discovery and filtering.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use super::ring::Neighbour;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum PodPhase {
    Pending,
    #[default]
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(value: &str) -> Self {
        match value {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// A discovered peer instance before filtering.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Candidate {
    pub pod_name: String,
    pub pod_ip: String,
    #[serde(default)]
    pub host_ip: String,
    pub node_name: String,
    #[serde(default)]
    pub phase: PodPhase,
    #[serde(default)]
    pub terminating: bool,
    #[serde(default = "schedulable")]
    pub node_schedulable: bool,
}

fn schedulable() -> bool {
    true
}

impl Candidate {
    pub fn running(
        pod_name: impl Into<String>,
        pod_ip: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        Self {
            pod_name: pod_name.into(),
            pod_ip: pod_ip.into(),
            host_ip: String::new(),
            node_name: node_name.into(),
            phase: PodPhase::Running,
            terminating: false,
            node_schedulable: true,
        }
    }

    fn into_neighbour(self) -> Neighbour {
        Neighbour::new(self.pod_name, self.pod_ip, self.host_ip, self.node_name)
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("cluster API request failed: {0}")]
    Kube(#[from] kube::Error),

    #[error("cluster client configuration failed: {0}")]
    Client(String),

    #[error("{0}")]
    Other(String),
}

/// Source of peer candidates.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn list_candidates(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Candidate>, DiscoveryError>;
}

/// Fixed candidate list. Used when no cluster API is reachable and in tests.
#[derive(Debug, Default, Clone)]
pub struct StaticDiscovery {
    candidates: Vec<Candidate>,
    failure: Option<String>,
}

impl StaticDiscovery {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            failure: None,
        }
    }

    /// A discovery that always fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            candidates: Vec::new(),
            failure: Some(message.into()),
        }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn list_candidates(
        &self,
        _namespace: &str,
        _label_selector: &str,
    ) -> Result<Vec<Candidate>, DiscoveryError> {
        match &self.failure {
            Some(message) => Err(DiscoveryError::Other(message.clone())),
            None => Ok(self.candidates.clone()),
        }
    }
}

/// Split discovery output into the own node name and the probe-eligible
/// neighbours.
///
/// The own record is recognised by pod name before any filtering, so a
/// terminating self still yields its node name. Eligible neighbours are
/// running, not terminating, and on a schedulable node unless
/// `allow_unschedulable` is set.
pub fn filter_candidates(
    candidates: Vec<Candidate>,
    own_pod: &str,
    allow_unschedulable: bool,
) -> (Option<String>, Vec<Neighbour>) {
    let mut self_node = None;
    let mut neighbours = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        if candidate.pod_name == own_pod {
            self_node = Some(candidate.node_name);
            continue;
        }
        if candidate.phase != PodPhase::Running || candidate.terminating {
            continue;
        }
        if !candidate.node_schedulable && !allow_unschedulable {
            continue;
        }
        neighbours.push(candidate.into_neighbour());
    }

    (self_node, neighbours)
}
