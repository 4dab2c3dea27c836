//! netnurse: per-node network health probes.
//!
//! Each instance probes the control-plane API (directly and via cluster
//! DNS), itself through ingress and service, and a bounded ring-selected set
//! of peer instances, publishing per-path outcomes and phase latency metrics.

// Core subsystems
pub mod checker;
pub mod neighbourhood;
pub mod transport;

// Surfaces
pub mod config;
pub mod http;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use checker::{Checker, ResultSnapshot};
pub use config::NurseConfig;
pub use lifecycle::Shutdown;
pub use transport::{CheckOutcome, InstrumentedTransport};
