//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → metrics sink → TLS trust → transport → discovery → checker
//!     → listeners → scheduler
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → not ready → shutdown delay → stop checker
//!     → stop listeners → exit
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The shutdown delay lets load balancers observe not-ready before the
//!   listeners go away

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
