//! Discovery backed by the Kubernetes API.

use std::collections::HashSet;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::ListParams;
use kube::{Api, Client};
use tracing::{debug, warn};

use super::discovery::{Candidate, Discovery, DiscoveryError, PodPhase};

/// Lists peer pods by label selector and annotates them with the
/// schedulability of their node.
#[derive(Clone)]
pub struct KubeDiscovery {
    client: Client,
    check_nodes: bool,
}

impl KubeDiscovery {
    /// Build a client from the in-cluster service account or a local
    /// kubeconfig.
    ///
    /// With `allow_unschedulable` set, the node listing is skipped and every
    /// node counts as schedulable.
    pub async fn try_default(allow_unschedulable: bool) -> Result<Self, DiscoveryError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, allow_unschedulable))
    }

    pub fn new(client: Client, allow_unschedulable: bool) -> Self {
        Self {
            client,
            check_nodes: !allow_unschedulable,
        }
    }

    async fn unschedulable_nodes(&self) -> Result<HashSet<String>, DiscoveryError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter(|node| {
                node.spec
                    .as_ref()
                    .and_then(|spec| spec.unschedulable)
                    .unwrap_or(false)
            })
            .filter_map(|node| node.metadata.name)
            .collect())
    }
}

#[async_trait]
impl Discovery for KubeDiscovery {
    async fn list_candidates(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Candidate>, DiscoveryError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        let list = pods.list(&params).await?;

        let cordoned = if self.check_nodes {
            self.unschedulable_nodes().await
        } else {
            Ok(HashSet::new())
        };

        let candidates = to_candidates(list.items, cordoned);
        debug!(namespace, label_selector, count = candidates.len(), "Listed neighbour candidates");
        Ok(candidates)
    }
}

/// A failed node listing leaves every node schedulable.
fn to_candidates(pods: Vec<Pod>, cordoned: Result<HashSet<String>, DiscoveryError>) -> Vec<Candidate> {
    let cordoned = cordoned.unwrap_or_else(|err| {
        warn!(error = %err, "Node listing failed, treating all nodes as schedulable");
        HashSet::new()
    });
    pods.into_iter().filter_map(|pod| to_candidate(pod, &cordoned)).collect()
}

/// Pods not yet bound to a node or without an address are dropped.
fn to_candidate(pod: Pod, cordoned: &HashSet<String>) -> Option<Candidate> {
    let pod_name = pod.metadata.name?;
    let terminating = pod.metadata.deletion_timestamp.is_some();
    let node_name = pod.spec.and_then(|spec| spec.node_name)?;
    let status = pod.status.unwrap_or_default();

    Some(Candidate {
        pod_name,
        pod_ip: status.pod_ip.unwrap_or_default(),
        host_ip: status.host_ip.unwrap_or_default(),
        phase: status.phase.as_deref().map(PodPhase::parse).unwrap_or(PodPhase::Unknown),
        terminating,
        node_schedulable: !cordoned.contains(&node_name),
        node_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(name: &str, node: Option<&str>, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: node.map(str::to_string),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                pod_ip: Some("10.0.0.9".to_string()),
                host_ip: Some("192.168.0.9".to_string()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_pod_maps_to_candidate() {
        let cordoned = HashSet::from(["node-x".to_string()]);
        let c = to_candidate(pod("nurse-a", Some("node-x"), "Running"), &cordoned).unwrap();
        assert_eq!(c.pod_name, "nurse-a");
        assert_eq!(c.node_name, "node-x");
        assert_eq!(c.pod_ip, "10.0.0.9");
        assert_eq!(c.host_ip, "192.168.0.9");
        assert_eq!(c.phase, PodPhase::Running);
        assert!(!c.node_schedulable);
        assert!(!c.terminating);
    }

    #[test]
    fn test_node_listing_failure_keeps_pods() {
        let pods = vec![
            pod("nurse-a", Some("node-x"), "Running"),
            pod("nurse-b", Some("node-y"), "Running"),
            pod("nurse-c", None, "Pending"),
        ];
        let failed = Err(DiscoveryError::Other("nodes is forbidden".to_string()));

        let candidates = to_candidates(pods, failed);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.node_schedulable));
    }

    #[test]
    fn test_cordoned_nodes_marked_unschedulable() {
        let pods = vec![
            pod("nurse-a", Some("node-x"), "Running"),
            pod("nurse-b", Some("node-y"), "Running"),
        ];
        let candidates = to_candidates(pods, Ok(HashSet::from(["node-y".to_string()])));
        assert!(candidates[0].node_schedulable);
        assert!(!candidates[1].node_schedulable);
    }

    #[test]
    fn test_unbound_pod_is_dropped() {
        assert!(to_candidate(pod("nurse-a", None, "Pending"), &HashSet::new()).is_none());
    }

    #[test]
    fn test_deletion_timestamp_marks_terminating() {
        let p: Pod = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "nurse-a", "deletionTimestamp": "2024-01-01T00:00:00Z" },
            "spec": { "nodeName": "node-y", "containers": [] },
            "status": { "phase": "Running", "podIP": "10.0.0.7" }
        }))
        .unwrap();
        let c = to_candidate(p, &HashSet::new()).unwrap();
        assert!(c.terminating);
        assert!(c.node_schedulable);
        assert_eq!(c.pod_ip, "10.0.0.7");
        assert_eq!(c.host_ip, "");
    }
}
