//! Metrics collection and exposition.
//!
//! # Metrics
//! - `netnurse_httpclient_requests_total` (counter): requests by `code`, `type`
//! - `netnurse_httpclient_request_duration_seconds` (histogram): latency by `type`
//! - `netnurse_httpclient_trace_request_duration_seconds` (histogram): time
//!   from request start to each connection phase, by `event`, `type`
//! - `netnurse_errors_total` (counter): errors by `event`, `type`
//! - `netnurse_neighbourhood_incoming_checks` (gauge): distinct peers that
//!   probed this instance within the TTL
//!
//! # Design Decisions
//! - The Prometheus recorder is owned by the sink instead of being installed
//!   globally, so every sink renders only what was emitted through it
//! - Histogram buckets tuned for sub-second network latencies by default

use metrics::Label as MetricLabel;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::observability::sink::{Label, MetricsSink};

pub const HTTPCLIENT_REQUESTS_TOTAL: &str = "netnurse_httpclient_requests_total";
pub const HTTPCLIENT_REQUEST_DURATION: &str = "netnurse_httpclient_request_duration_seconds";
pub const HTTPCLIENT_TRACE_REQUEST_DURATION: &str = "netnurse_httpclient_trace_request_duration_seconds";
pub const ERRORS_TOTAL: &str = "netnurse_errors_total";
pub const NEIGHBOURHOOD_INCOMING_CHECKS: &str = "netnurse_neighbourhood_incoming_checks";

/// Default histogram buckets, in seconds.
pub const DEFAULT_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// [`MetricsSink`] backed by a Prometheus recorder.
pub struct PrometheusSink {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl PrometheusSink {
    /// Build a sink whose histograms use `buckets` (seconds).
    pub fn new(buckets: &[f64]) -> Result<Self, BuildError> {
        let mut builder = PrometheusBuilder::new();
        if !buckets.is_empty() {
            builder = builder.set_buckets(buckets)?;
        }
        let recorder = builder.build_recorder();
        let handle = recorder.handle();
        Ok(Self { recorder, handle })
    }

    /// Prometheus text exposition of everything emitted so far.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Drain histogram buffers; call periodically.
    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }
}

impl std::fmt::Debug for PrometheusSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusSink").finish_non_exhaustive()
    }
}

fn to_metric_labels(labels: &[Label]) -> Vec<MetricLabel> {
    labels
        .iter()
        .map(|(key, value)| MetricLabel::new(*key, value.clone()))
        .collect()
}

impl MetricsSink for PrometheusSink {
    fn increment_counter(&self, name: &'static str, labels: &[Label]) {
        let labels = to_metric_labels(labels);
        metrics::with_local_recorder(&self.recorder, || {
            metrics::counter!(name, labels).increment(1);
        });
    }

    fn observe_histogram(&self, name: &'static str, labels: &[Label], seconds: f64) {
        let labels = to_metric_labels(labels);
        metrics::with_local_recorder(&self.recorder, || {
            metrics::histogram!(name, labels).record(seconds);
        });
    }

    fn set_gauge(&self, name: &'static str, labels: &[Label], value: f64) {
        let labels = to_metric_labels(labels);
        metrics::with_local_recorder(&self.recorder, || {
            metrics::gauge!(name, labels).set(value);
        });
    }
}
