//! Probe definitions and request construction.

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request};

use crate::transport::{ProbeRequest, TransportError};

pub const API_SERVER_DIRECT: &str = "api_server_direct";
pub const API_SERVER_DNS: &str = "api_server_dns";
pub const ME_INGRESS: &str = "me_ingress";
pub const ME_SERVICE: &str = "me_service";

/// Labels of the four built-in probes.
pub const FIXED_LABELS: [&str; 4] = [API_SERVER_DIRECT, API_SERVER_DNS, ME_INGRESS, ME_SERVICE];

/// Prefix of neighbour probe labels, followed by the node name.
pub const NEIGHBOUR_LABEL_PREFIX: &str = "path_";

/// Header carrying the probing pod's name on neighbour probes.
pub const ORIGIN_HEADER: &str = "netnurse-neighbour-origin";

/// Path answered by every agent with an empty 200.
pub const ALWAYS_HAPPY_PATH: &str = "/alwayshappy";

/// One outbound check of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub label: String,
    pub url: String,
    /// Attach the bearer token.
    pub bearer: bool,
    /// Attach the origin header.
    pub origin: bool,
}

impl Probe {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            bearer: false,
            origin: false,
        }
    }

    pub fn with_bearer(mut self) -> Self {
        self.bearer = true;
        self
    }

    pub fn with_origin(mut self) -> Self {
        self.origin = true;
        self
    }

    /// Build the GET request. A missing token drops the `Authorization`
    /// header rather than failing the probe.
    pub fn build_request(
        &self,
        token: Option<&str>,
        origin: &str,
    ) -> Result<ProbeRequest, TransportError> {
        let invalid = || TransportError::InvalidUrl(self.url.clone());
        let mut request = Request::builder()
            .method(Method::GET)
            .uri(self.url.as_str())
            .body(Body::empty())
            .map_err(|_| invalid())?;

        let headers = request.headers_mut();
        if let (true, Some(token)) = (self.bearer, token) {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                TransportError::Other("bearer token is not a valid header value".to_string())
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }
        if self.origin && !origin.is_empty() {
            let value = HeaderValue::from_str(origin)
                .map_err(|_| TransportError::Other(format!("invalid origin {origin:?}")))?;
            headers.insert(ORIGIN_HEADER, value);
        }
        Ok(request)
    }
}

/// `{base}/alwayshappy`, tolerating a trailing slash on `base`.
pub fn always_happy_url(base: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), ALWAYS_HAPPY_PATH)
}
