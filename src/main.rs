//! netnurse agent.
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────┐
//!                 │                    NETNURSE                      │
//!                 │                                                  │
//!   scheduler ───▶│  checker ──▶ instrumented transport ──▶ probes ──┼──▶ API server,
//!                 │     │              │                             │    ingress, service,
//!                 │     │              ▼                             │    neighbours
//!                 │     │        metrics sink ──▶ /metrics           │
//!                 │     ▼                                            │
//!                 │  neighbourhood (discovery → ring selection)      │
//!                 │     │                                            │
//!                 │     ▼                                            │
//!                 │  snapshot ──▶ /alive      ttl cache ◀── /alwayshappy
//!                 └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use netnurse::config::load_config;
use netnurse::lifecycle::startup;
use netnurse::observability::logging;

#[derive(Parser)]
#[command(name = "netnurse")]
#[command(about = "Network health probes for clustered workloads", long_about = None)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(short, long, env = "NETNURSE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, overriding the configured one
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init(cli.log_level.as_deref().unwrap_or("info"));
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    logging::init(cli.log_level.as_deref().unwrap_or(&config.observability.log_level));

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        http = %config.server.http_bind_address,
        namespace = %config.neighbourhood.namespace,
        "netnurse starting"
    );

    match startup::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "netnurse failed");
            ExitCode::FAILURE
        }
    }
}
