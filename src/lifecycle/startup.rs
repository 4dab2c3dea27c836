//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Start background tasks (check scheduler, metrics upkeep)
//! - Bind listeners and begin accepting traffic
//! - Run the shutdown sequence
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - A listener failing at runtime also starts the shutdown sequence

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::checker::Checker;
use crate::config::{ConfigError, DiscoveryMode, NurseConfig};
use crate::http::{tls::load_server_config, AppState, HttpServer};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::wait_for_signal;
use crate::neighbourhood::{Discovery, DiscoveryError, KubeDiscovery, StaticDiscovery};
use crate::observability::PrometheusSink;
use crate::transport::tls::{client_config, TlsSetupError, TrustOptions};
use crate::transport::{HttpTransport, InstrumentedTransport};

const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("metrics: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("outbound tls: {0}")]
    Tls(#[from] TlsSetupError),

    #[error("discovery: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("invalid listen address {0:?}")]
    Address(String),

    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server.use_tls requires server.cert_path and server.key_path")]
    MissingCertificate,

    #[error("server certificate: {0}")]
    ServerCertificate(#[source] std::io::Error),

    #[error("listener failed: {0}")]
    Listener(#[source] std::io::Error),
}

/// Run the agent until SIGINT/SIGTERM, then shut down in order.
pub async fn run(config: NurseConfig) -> Result<(), StartupError> {
    // kube and axum-server link a second rustls provider; pin ours.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let sink = Arc::new(PrometheusSink::new(&config.observability.histogram_buckets)?);
    let trust = TrustOptions {
        ca_bundles: config.tls.ca_bundles(),
        insecure: config.tls.insecure,
    };
    let http = HttpTransport::new(client_config(&trust)?, config.checks.request_timeout());
    let transport = InstrumentedTransport::new(Arc::new(http), sink.clone());
    let discovery = build_discovery(&config).await?;
    let checker = Arc::new(Checker::new(&config, transport, discovery)?);

    let ready = Arc::new(AtomicBool::new(true));
    let state = AppState {
        checker: checker.clone(),
        sink: sink.clone(),
        ready: ready.clone(),
        hostname: config.neighbourhood.pod_name.clone(),
    };
    let server = Arc::new(HttpServer::new(
        state,
        Duration::from_secs(config.server.request_timeout_secs),
    ));

    let listeners = Shutdown::new();
    let mut servers: JoinSet<std::io::Result<()>> = JoinSet::new();

    let addr = &config.server.http_bind_address;
    let listener = TcpListener::bind(addr).await.map_err(|source| StartupError::Bind {
        addr: addr.clone(),
        source,
    })?;
    {
        let server = server.clone();
        let signal = listeners.subscribe();
        servers.spawn(async move { server.run(listener, signal).await });
    }

    if config.server.use_tls {
        let addr: SocketAddr = config
            .server
            .https_bind_address
            .parse()
            .map_err(|_| StartupError::Address(config.server.https_bind_address.clone()))?;
        let (Some(cert), Some(key)) = (&config.server.cert_path, &config.server.key_path) else {
            return Err(StartupError::MissingCertificate);
        };
        let tls = load_server_config(cert, key)
            .await
            .map_err(StartupError::ServerCertificate)?;
        let server = server.clone();
        let signal = listeners.subscribe();
        servers.spawn(async move { server.run_tls(addr, tls, signal).await });
    }

    let upkeep = {
        let sink = sink.clone();
        let mut signal = listeners.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(UPKEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = signal.recv() => break,
                    _ = ticker.tick() => sink.run_upkeep(),
                }
            }
        })
    };

    let scheduler = {
        let checker = checker.clone();
        let signal = listeners.subscribe();
        let interval = config.checks.interval();
        tokio::spawn(async move { checker.run_scheduled(interval, signal).await })
    };

    info!(
        interval_ms = config.checks.interval_ms,
        neighbour_limit = config.neighbourhood.neighbour_limit,
        tls = config.server.use_tls,
        "netnurse started"
    );

    let mut failure = None;
    tokio::select! {
        name = wait_for_signal() => info!(signal = name, "Shutdown signal received"),
        Some(joined) = servers.join_next() => {
            match joined {
                Ok(Ok(())) => warn!("Listener stopped unexpectedly"),
                Ok(Err(e)) => {
                    error!(error = %e, "Listener failed");
                    failure = Some(StartupError::Listener(e));
                }
                Err(e) => error!(error = %e, "Listener task failed"),
            }
        }
    }

    ready.store(false, Ordering::Release);
    info!(delay_secs = config.server.shutdown_delay_secs, "Not ready, waiting before shutdown");
    tokio::time::sleep(config.server.shutdown_delay()).await;

    checker.stop();
    if let Err(e) = scheduler.await {
        error!(error = %e, "Checker task failed");
    }

    listeners.trigger();
    while let Some(joined) = servers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Listener failed during shutdown"),
            Err(e) => error!(error = %e, "Listener task failed"),
        }
    }
    let _ = upkeep.await;

    info!("Shutdown complete");
    failure.map_or(Ok(()), Err)
}

async fn build_discovery(config: &NurseConfig) -> Result<Arc<dyn Discovery>, StartupError> {
    if config.checks.skip_neighbourhood {
        return Ok(Arc::new(StaticDiscovery::default()));
    }
    match config.discovery.mode {
        DiscoveryMode::Static => {
            info!(candidates = config.discovery.candidates.len(), "Using static neighbour list");
            Ok(Arc::new(StaticDiscovery::new(config.discovery.candidates.clone())))
        }
        DiscoveryMode::Kubernetes => {
            let discovery =
                KubeDiscovery::try_default(config.neighbourhood.allow_unschedulable).await?;
            Ok(Arc::new(discovery))
        }
    }
}
