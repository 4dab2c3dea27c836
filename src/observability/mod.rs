//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Instrumented transport / checker:
//!     → sink.rs (MetricsSink trait: counters, histograms, gauges)
//!         → metrics.rs (PrometheusSink, rendered at /metrics)
//!         → sink.rs (RecordingSink, in-memory for assertions)
//!     → tracing events (structured log lines)
//!
//! Startup:
//!     → logging.rs (subscriber with env filter)
//! ```
//!
//! # Design Decisions
//! - The sink is an explicit instance injected into the transport and the
//!   checker; there is no global registry
//! - Emitting a sample never fails the caller

pub mod logging;
pub mod metrics;
pub mod sink;

pub use self::metrics::PrometheusSink;
pub use sink::{Label, MetricsSink, RecordingSink, Sample};
