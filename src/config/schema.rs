//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::neighbourhood::Candidate;

/// Root configuration for the agent.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct NurseConfig {
    /// Status listeners.
    pub server: ServerConfig,

    /// Probe targets, skip flags and cycle timing.
    pub checks: ChecksConfig,

    /// Peer discovery and selection.
    pub neighbourhood: NeighbourhoodConfig,

    /// Outbound trust material and credentials.
    pub tls: TlsConfig,

    pub discovery: DiscoveryConfig,

    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Plain HTTP bind address.
    pub http_bind_address: String,

    /// HTTPS bind address, only used with `use_tls`.
    pub https_bind_address: String,

    /// Serve HTTPS next to HTTP and probe neighbours over HTTPS.
    pub use_tls: bool,

    /// Certificate chain (PEM) for the HTTPS listener.
    pub cert_path: Option<PathBuf>,

    /// Private key (PEM) for the HTTPS listener.
    pub key_path: Option<PathBuf>,

    /// Time between reporting not-ready and stopping the listeners.
    pub shutdown_delay_secs: u64,

    /// Per-request timeout on the status endpoints.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_bind_address: "0.0.0.0:8080".to_string(),
            https_bind_address: "0.0.0.0:8443".to_string(),
            use_tls: false,
            cert_path: None,
            key_path: None,
            shutdown_delay_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_secs(self.shutdown_delay_secs)
    }
}

/// Probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChecksConfig {
    /// Time between the starts of two cycles, in milliseconds.
    pub interval_ms: u64,

    /// Whole-call timeout of a single probe, in milliseconds.
    pub request_timeout_ms: u64,

    /// Control-plane API address for the direct probe.
    pub api_server_host: String,
    pub api_server_port: u16,

    /// Cluster DNS name of the control-plane API.
    pub api_server_dns_name: String,

    /// Base URL of this agent behind the external ingress.
    pub ingress_url: String,

    /// Base URL of this agent behind the internal service.
    pub service_url: String,

    pub skip_api_server_direct: bool,
    pub skip_api_server_dns: bool,
    pub skip_me_ingress: bool,
    pub skip_me_service: bool,
    pub skip_neighbourhood: bool,

    /// Additional probes, check label → URL.
    pub extra_checks: BTreeMap<String, String>,

    /// Upper bound on probes in flight at once.
    pub max_concurrent_probes: usize,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            request_timeout_ms: 3_000,
            api_server_host: String::new(),
            api_server_port: 443,
            api_server_dns_name: "kubernetes.default.svc.cluster.local".to_string(),
            ingress_url: String::new(),
            service_url: String::new(),
            skip_api_server_direct: false,
            skip_api_server_dns: false,
            skip_me_ingress: false,
            skip_me_service: false,
            skip_neighbourhood: false,
            extra_checks: BTreeMap::new(),
            max_concurrent_probes: 64,
        }
    }
}

impl ChecksConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Neighbour discovery and selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NeighbourhoodConfig {
    /// Namespace the agent pods run in.
    pub namespace: String,

    /// Label selector identifying agent pods.
    pub label_selector: String,

    /// Neighbours probed per cycle; 0 probes every candidate.
    pub neighbour_limit: usize,

    /// Also probe peers on cordoned nodes.
    pub allow_unschedulable: bool,

    pub neighbour_http_port: u16,
    pub neighbour_https_port: u16,

    /// How long an inbound peer ping counts toward the fan-in gauge.
    pub incoming_ttl_secs: u64,

    /// Own pod name, used to find self among candidates.
    pub pod_name: String,
}

impl Default for NeighbourhoodConfig {
    fn default() -> Self {
        Self {
            namespace: "kube-system".to_string(),
            label_selector: "app.kubernetes.io/name=netnurse".to_string(),
            neighbour_limit: 10,
            allow_unschedulable: false,
            neighbour_http_port: 8080,
            neighbour_https_port: 8443,
            incoming_ttl_secs: 60,
            pod_name: String::new(),
        }
    }
}

impl NeighbourhoodConfig {
    pub fn incoming_ttl(&self) -> Duration {
        Duration::from_secs(self.incoming_ttl_secs)
    }
}

/// Outbound TLS trust and credentials.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Service-account CA bundle (PEM).
    pub ca_path: Option<PathBuf>,

    /// Additional CA bundle (PEM).
    pub extra_ca_path: Option<PathBuf>,

    /// Bearer token file for the API-server DNS probe.
    pub token_path: Option<PathBuf>,

    /// Disable certificate verification on all probes.
    pub insecure: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        const SERVICE_ACCOUNT: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
        Self {
            ca_path: Some(PathBuf::from(format!("{SERVICE_ACCOUNT}/ca.crt"))),
            extra_ca_path: None,
            token_path: Some(PathBuf::from(format!("{SERVICE_ACCOUNT}/token"))),
            insecure: false,
        }
    }
}

impl TlsConfig {
    pub fn ca_bundles(&self) -> Vec<PathBuf> {
        self.ca_path
            .iter()
            .chain(self.extra_ca_path.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    #[default]
    Kubernetes,
    Static,
}

/// Source of neighbour candidates.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub mode: DiscoveryMode,

    /// Candidate list for `mode = "static"`.
    #[serde(skip_serializing)]
    pub candidates: Vec<Candidate>,
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Latency histogram buckets, in seconds.
    pub histogram_buckets: Vec<f64>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            histogram_buckets: crate::observability::metrics::DEFAULT_BUCKETS.to_vec(),
        }
    }
}
