//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! optional config file (TOML)
//!     → loader.rs (parse & deserialize, defaults for missing fields)
//!     → loader.rs (NETNURSE_* / KUBERNETES_SERVICE_* overrides)
//!     → validation.rs (semantic checks)
//!     → NurseConfig (validated, immutable)
//!     → cloned into the checker, transport and HTTP surface at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults so the agent runs from environment alone
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ChecksConfig, DiscoveryConfig, DiscoveryMode, NeighbourhoodConfig, NurseConfig,
    ObservabilityConfig, ServerConfig, TlsConfig,
};
