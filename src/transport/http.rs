//! Network transport that reports every connection phase.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::header::{HeaderValue, HOST, USER_AGENT};
use axum::http::uri::PathAndQuery;
use axum::http::Uri;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time;
use tokio_rustls::TlsConnector;

use crate::transport::io::TracedIo;
use crate::transport::trace::{TraceContext, TraceEvent};
use crate::transport::{ProbeRequest, ProbeResponse, RoundTrip, TransportError};

const DEFAULT_USER_AGENT: &str = concat!("netnurse/", env!("CARGO_PKG_VERSION"));

/// HTTP/1.1 client opening a fresh connection per request.
#[derive(Clone)]
pub struct HttpTransport {
    tls: TlsConnector,
    timeout: Duration,
}

impl HttpTransport {
    /// `timeout` bounds the whole exchange, from DNS lookup to response head.
    pub fn new(tls: Arc<ClientConfig>, timeout: Duration) -> Self {
        Self {
            tls: TlsConnector::from(tls),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(
        &self,
        mut request: ProbeRequest,
        trace: &TraceContext,
    ) -> Result<ProbeResponse, TransportError> {
        let target = Target::from_uri(request.uri())?;
        let addrs = resolve(&target, trace).await?;
        let stream = connect(&addrs, trace).await?;

        prepare(&mut request, &target)?;

        if target.https {
            let server_name = ServerName::try_from(target.host.clone())
                .map_err(|_| TransportError::ServerName(target.host.clone()))?;
            trace.record(TraceEvent::TlsHandshakeStart);
            let stream = match self.tls.connect(server_name, stream).await {
                Ok(stream) => stream,
                Err(source) => {
                    let err = TransportError::Tls {
                        host: target.host.clone(),
                        source,
                    };
                    trace.record_error(TraceEvent::TlsHandshakeDone, &err);
                    return Err(err);
                }
            };
            trace.record(TraceEvent::TlsHandshakeDone);
            trace.record(TraceEvent::GotConn);
            exchange(stream, request, trace).await
        } else {
            trace.record(TraceEvent::GotConn);
            exchange(stream, request, trace).await
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RoundTrip for HttpTransport {
    async fn round_trip(
        &self,
        request: ProbeRequest,
        trace: &TraceContext,
    ) -> Result<ProbeResponse, TransportError> {
        match time::timeout(self.timeout, self.send(request, trace)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }
}

/// Where a request goes, split out of its URI.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    https: bool,
    /// Host without IPv6 brackets.
    host: String,
    port: u16,
    /// Value for the `Host` header.
    authority: String,
}

impl Target {
    fn from_uri(uri: &Uri) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidUrl(uri.to_string());
        let https = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            _ => return Err(invalid()),
        };
        let authority = uri.authority().ok_or_else(invalid)?;
        let host = authority.host();
        if host.is_empty() {
            return Err(invalid());
        }
        let default_port = if https { 443 } else { 80 };
        Ok(Self {
            https,
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port: authority.port_u16().unwrap_or(default_port),
            authority: authority.as_str().to_string(),
        })
    }
}

/// DNS phase; skipped for IP literals.
async fn resolve(target: &Target, trace: &TraceContext) -> Result<Vec<SocketAddr>, TransportError> {
    if let Ok(ip) = target.host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, target.port)]);
    }

    trace.record(TraceEvent::DnsStart);
    let result = match tokio::net::lookup_host((target.host.as_str(), target.port)).await {
        Ok(addrs) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            if addrs.is_empty() {
                Err(TransportError::NoAddresses(target.host.clone()))
            } else {
                Ok(addrs)
            }
        }
        Err(source) => Err(TransportError::Dns {
            host: target.host.clone(),
            source,
        }),
    };

    match &result {
        Ok(_) => trace.record(TraceEvent::DnsDone),
        Err(err) => trace.record_error(TraceEvent::DnsDone, err),
    }
    result
}

/// Connect phase; addresses are tried in resolver order.
async fn connect(addrs: &[SocketAddr], trace: &TraceContext) -> Result<TcpStream, TransportError> {
    trace.record(TraceEvent::ConnectStart);

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(request_type = %trace.label(), error = %e, "failed to set TCP_NODELAY");
                }
                trace.record(TraceEvent::ConnectDone);
                return Ok(stream);
            }
            Err(source) => {
                last_err = Some(TransportError::Connect {
                    addr: addr.to_string(),
                    source,
                });
            }
        }
    }

    let err = last_err.unwrap_or_else(|| TransportError::NoAddresses(String::new()));
    trace.record_error(TraceEvent::ConnectDone, &err);
    Err(err)
}

/// Rewrite the request into origin form with `Host` and `User-Agent` set.
fn prepare(request: &mut ProbeRequest, target: &Target) -> Result<(), TransportError> {
    let path = request
        .uri()
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    *request.uri_mut() = Uri::from(path);

    let host = HeaderValue::from_str(&target.authority)
        .map_err(|_| TransportError::InvalidUrl(target.authority.clone()))?;
    let headers = request.headers_mut();
    headers.entry(HOST).or_insert(host);
    headers
        .entry(USER_AGENT)
        .or_insert(HeaderValue::from_static(DEFAULT_USER_AGENT));
    Ok(())
}

/// Drive one HTTP/1.1 exchange on an established connection.
///
/// The connection future is polled in place rather than spawned, so it may
/// borrow the trace; it is dropped (closing the socket) once the response
/// head arrives.
async fn exchange<S>(
    stream: S,
    request: ProbeRequest,
    trace: &TraceContext,
) -> Result<ProbeResponse, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let io = TokioIo::new(TracedIo::new(stream, trace));
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
    let mut conn = std::pin::pin!(conn);

    let response = tokio::select! {
        response = sender.send_request(request) => response?,
        closed = &mut conn => {
            closed?;
            return Err(TransportError::ConnectionClosed);
        }
    };

    let (parts, _body) = response.into_parts();
    Ok(ProbeResponse::from_parts(parts, ()))
}
