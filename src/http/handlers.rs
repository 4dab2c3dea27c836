//! Request handlers for the status endpoints.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::checker::probe::ORIGIN_HEADER;
use crate::checker::ResultSnapshot;
use crate::http::server::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// 200 while ready, 503 once shutdown started.
pub async fn ready(State(state): State<AppState>) -> StatusCode {
    if state.ready.load(Ordering::Acquire) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[derive(Serialize)]
struct AliveOutput<'a> {
    hostname: &'a str,
    headers: BTreeMap<String, Vec<String>>,
    user_agent: &'a str,
    request_uri: String,
    remote_addr: String,
    last_check_result: &'a ResultSnapshot,
}

/// Last snapshot plus an echo of the request. 500 before the first cycle.
pub async fn alive(State(state): State<AppState>, request: Request<Body>) -> Response {
    let Some(snapshot) = state.checker.last_snapshot() else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in request.headers() {
        headers
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();

    let output = AliveOutput {
        hostname: &state.hostname,
        user_agent: request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default(),
        request_uri: request.uri().to_string(),
        remote_addr,
        headers,
        last_check_result: &snapshot,
    };
    Json(output).into_response()
}

/// Empty 200. Records the probing neighbour, if named.
pub async fn always_happy(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    if let Some(origin) = headers
        .get(ORIGIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        state.checker.record_ping(origin);
    }
    StatusCode::OK
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    state.checker.report_incoming_checks();
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], state.sink.render()).into_response()
}

pub async fn root() -> Response {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "/alive")]).into_response()
}
