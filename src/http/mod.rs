//! Status endpoints.
//!
//! # Data Flow
//! ```text
//! TCP (and optional TLS) connection
//!     → server.rs (Axum router, trace + timeout layers)
//!     → handlers.rs
//!         /ready        readiness flag
//!         /alive        last snapshot + request echo
//!         /alwayshappy  empty 200, records neighbour origin
//!         /metrics      Prometheus exposition
//!         /             301 → /alive
//! ```
//!
//! # Design Decisions
//! - Handlers only read published state; nothing here waits on a cycle
//! - HTTP and HTTPS listeners share one router

pub mod handlers;
pub mod server;
pub mod tls;

pub use server::{AppState, HttpServer};
