//! Transport-level failures (no HTTP response obtained).

use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// URL missing a scheme or host, or with an unsupported scheme.
    #[error("invalid request url {0:?}")]
    InvalidUrl(String),

    #[error("lookup {host}: {source}")]
    Dns {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("lookup {0}: no such host")]
    NoAddresses(String),

    #[error("dial tcp {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid tls server name {0:?}")]
    ServerName(String),

    #[error("tls handshake with {host}: {source}")]
    Tls {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("http: {0}")]
    Http(#[from] hyper::Error),

    #[error("connection closed before response")]
    ConnectionClosed,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Failure reported by a non-network transport.
    #[error("{0}")]
    Other(String),
}
