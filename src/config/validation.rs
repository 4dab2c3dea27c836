//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, buckets increasing)
//! - Reject extra checks that collide with built-in check labels
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: NurseConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::BTreeMap;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::checker::probe::{FIXED_LABELS, NEIGHBOUR_LABEL_PREFIX};
use crate::checker::snapshot::SNAPSHOT_KEYS;
use crate::config::schema::NurseConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field}: {value:?} is not a socket address")]
    BindAddress { field: &'static str, value: String },

    #[error("server.use_tls requires server.cert_path and server.key_path")]
    MissingCertificate,

    #[error("{field}: {value:?} is not an http(s) URL")]
    Url { field: String, value: String },

    #[error("extra check name must not be empty")]
    EmptyCheckName,

    #[error("extra check {0:?} collides with a built-in check label or result key")]
    ReservedCheckName(String),

    #[error("observability.histogram_buckets must be positive and strictly increasing")]
    Buckets,

    #[error("neighbourhood.pod_name is required unless the neighbourhood check is skipped")]
    MissingPodName,
}

/// Validate the full configuration, collecting every problem.
pub fn validate_config(config: &NurseConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (field, value) in [
        ("server.http_bind_address", &config.server.http_bind_address),
        ("server.https_bind_address", &config.server.https_bind_address),
    ] {
        if value.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::BindAddress {
                field,
                value: value.clone(),
            });
        }
    }
    if config.server.use_tls && (config.server.cert_path.is_none() || config.server.key_path.is_none()) {
        errors.push(ValidationError::MissingCertificate);
    }

    for (field, value) in [
        ("checks.interval_ms", config.checks.interval_ms),
        ("checks.request_timeout_ms", config.checks.request_timeout_ms),
        ("checks.max_concurrent_probes", config.checks.max_concurrent_probes as u64),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    for (field, value, skipped) in [
        ("checks.ingress_url", &config.checks.ingress_url, config.checks.skip_me_ingress),
        ("checks.service_url", &config.checks.service_url, config.checks.skip_me_service),
    ] {
        if !skipped && !value.is_empty() && !is_http_url(value) {
            errors.push(ValidationError::Url {
                field: field.to_string(),
                value: value.clone(),
            });
        }
    }

    errors.extend(validate_extra_checks(&config.checks.extra_checks));

    if !config.checks.skip_neighbourhood && config.neighbourhood.pod_name.is_empty() {
        errors.push(ValidationError::MissingPodName);
    }

    let buckets = &config.observability.histogram_buckets;
    if buckets.is_empty() || buckets[0] <= 0.0 || buckets.windows(2).any(|w| w[0] >= w[1]) {
        errors.push(ValidationError::Buckets);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Extra checks need a non-empty name outside the built-in label space and
/// an http(s) URL.
pub fn validate_extra_checks(checks: &BTreeMap<String, String>) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for (name, url) in checks {
        if name.is_empty() {
            errors.push(ValidationError::EmptyCheckName);
        } else if FIXED_LABELS.contains(&name.as_str())
            || SNAPSHOT_KEYS.contains(&name.as_str())
            || name.starts_with(NEIGHBOUR_LABEL_PREFIX)
        {
            errors.push(ValidationError::ReservedCheckName(name.clone()));
        }
        if !is_http_url(url) {
            errors.push(ValidationError::Url {
                field: format!("checks.extra_checks.{name}"),
                value: url.clone(),
            });
        }
    }
    errors
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}
