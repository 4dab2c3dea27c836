//! Outcome of a single probe.

use std::fmt;

use axum::http::StatusCode;
use serde::{Serialize, Serializer};

use crate::transport::{ProbeResponse, TransportError};

/// `skipped`, `ok`, or the error detail of a failed probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Disabled by configuration; no request was issued.
    Skipped,
    /// HTTP 200.
    Ok,
    /// Status text of a non-200 response or a transport error message.
    Error(String),
}

impl CheckOutcome {
    pub fn from_result(result: &Result<ProbeResponse, TransportError>) -> Self {
        match result {
            Ok(response) if response.status() == StatusCode::OK => CheckOutcome::Ok,
            Ok(response) => CheckOutcome::Error(status_text(response.status())),
            Err(err) => CheckOutcome::Error(err.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CheckOutcome::Error(_))
    }
}

/// `"404 Not Found"` style status line text.
pub fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutcome::Skipped => f.write_str("skipped"),
            CheckOutcome::Ok => f.write_str("ok"),
            CheckOutcome::Error(detail) => f.write_str(detail),
        }
    }
}

impl Serialize for CheckOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
