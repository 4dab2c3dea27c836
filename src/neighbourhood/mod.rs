//! Neighbourhood: peer discovery, bounded peer selection, fan-in tracking.
//!
//! # Data Flow
//! ```text
//! Each cycle:
//!     discovery.rs (Discovery trait: cluster.rs or StaticDiscovery)
//!     → candidate records (phase, terminating, schedulability)
//!     → filter (running, not terminating, schedulable, not self)
//!     → ring.rs (K deterministic successors on the hash ring)
//!     → neighbour probes
//!
//! Inbound:
//!     peer probe hits /alwayshappy
//!     → ttl_cache.rs (origin recorded, expires after TTL)
//!     → incoming checks gauge
//! ```
//!
//! # Design Decisions
//! - Ring selection bounds fleet-wide peer checks to N·K while every node
//!   still receives exactly K checks
//! - Neighbour records are rebuilt every cycle and never cached

pub mod cluster;
pub mod discovery;
pub mod ring;
pub mod ttl_cache;

pub use cluster::KubeDiscovery;
pub use discovery::{Candidate, Discovery, DiscoveryError, PodPhase, StaticDiscovery};
pub use ring::{node_hash, select, Neighbour, SelectError};
pub use ttl_cache::TtlCache;
