//! Instrumented HTTP transport.
//!
//! # Data Flow
//! ```text
//! checker (label, request)
//!     → instrumented.rs (creates TraceContext, records outcome metrics)
//!     → RoundTrip implementation:
//!         http.rs: DNS → TCP connect → TLS (tls.rs) → HTTP/1.1 over io.rs
//!     → each phase reports to trace.rs (duration sample or counted error)
//!     → CheckOutcome (outcome.rs)
//! ```
//!
//! # Design Decisions
//! - The per-call trace is an explicit argument, not request-scoped storage
//! - A probe's failure is counted once: the first phase that fails claims the
//!   error, the final outcome handler only counts when nobody did
//! - One connection per probe; connection reuse would hide connect/TLS
//!   latency, which is what the probes are meant to observe

pub mod error;
pub mod http;
pub mod instrumented;
mod io;
pub mod outcome;
pub mod tls;
pub mod trace;

use async_trait::async_trait;
use axum::body::Body;

pub use error::TransportError;
pub use http::HttpTransport;
pub use instrumented::InstrumentedTransport;
pub use outcome::CheckOutcome;
pub use trace::{TraceContext, TraceEvent};

/// Outbound probe request. Probes are bodiless GETs.
pub type ProbeRequest = axum::http::Request<Body>;

/// Response head of a probe; the body is never read.
pub type ProbeResponse = axum::http::Response<()>;

/// Something that can perform one HTTP exchange while reporting its
/// connection phases to `trace`.
#[async_trait]
pub trait RoundTrip: Send + Sync {
    async fn round_trip(
        &self,
        request: ProbeRequest,
        trace: &TraceContext,
    ) -> Result<ProbeResponse, TransportError>;
}
