//! Check orchestration.
//!
//! # Data Flow
//! ```text
//! scheduler tick (orchestrator.rs run_scheduled)
//!     → probe.rs (fixed probes, extra probes, neighbour probes)
//!     → one task per probe, gated by a semaphore
//!     → InstrumentedTransport (metrics as a side effect)
//!     → snapshot.rs ResultSnapshot, published with one atomic swap
//!
//! status handlers
//!     → last_snapshot() (never waits on a running cycle)
//! ```
//!
//! # Design Decisions
//! - Probe and discovery failures are values in the snapshot, never errors
//!   of the checker itself
//! - Only construction fails, on invalid extra checks
//! - A stop request ends scheduling but lets a running cycle finish; each
//!   probe is bounded by the transport timeout

pub mod credentials;
pub mod orchestrator;
pub mod probe;
pub mod snapshot;

pub use credentials::FileToken;
pub use orchestrator::Checker;
pub use probe::Probe;
pub use snapshot::ResultSnapshot;
