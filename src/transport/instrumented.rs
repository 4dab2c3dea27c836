//! Outcome metrics around a [`RoundTrip`].

use std::sync::Arc;

use axum::http::StatusCode;

use crate::observability::metrics::{
    ERRORS_TOTAL, HTTPCLIENT_REQUESTS_TOTAL, HTTPCLIENT_REQUEST_DURATION,
};
use crate::observability::MetricsSink;
use crate::transport::trace::TraceContext;
use crate::transport::{CheckOutcome, ProbeRequest, ProbeResponse, RoundTrip, TransportError};

const ROUND_TRIP_ERROR: &str = "round_trip_error";

/// Wraps a transport so that every call is traced under a check label.
#[derive(Clone)]
pub struct InstrumentedTransport {
    inner: Arc<dyn RoundTrip>,
    sink: Arc<dyn MetricsSink>,
}

impl InstrumentedTransport {
    pub fn new(inner: Arc<dyn RoundTrip>, sink: Arc<dyn MetricsSink>) -> Self {
        Self { inner, sink }
    }

    pub fn sink(&self) -> &Arc<dyn MetricsSink> {
        &self.sink
    }

    /// Perform `request` under `label`, emitting phase and outcome metrics.
    pub async fn execute(
        &self,
        label: &str,
        request: ProbeRequest,
    ) -> Result<ProbeResponse, TransportError> {
        let trace = TraceContext::new(label, self.sink.clone());
        let result = self.inner.round_trip(request, &trace).await;

        match &result {
            Ok(response) => self.record_response(&trace, response.status()),
            Err(err) => self.record_failure(&trace, err),
        }
        result
    }

    /// Like [`execute`](Self::execute), reduced to the probe outcome.
    pub async fn probe(&self, label: &str, request: ProbeRequest) -> CheckOutcome {
        CheckOutcome::from_result(&self.execute(label, request).await)
    }

    fn record_response(&self, trace: &TraceContext, status: StatusCode) {
        let label = trace.label().to_string();
        self.sink.increment_counter(
            HTTPCLIENT_REQUESTS_TOTAL,
            &[("code", status.as_u16().to_string()), ("type", label.clone())],
        );
        self.sink.observe_histogram(
            HTTPCLIENT_REQUEST_DURATION,
            &[("type", label.clone())],
            trace.elapsed().as_secs_f64(),
        );

        if status != StatusCode::OK {
            // A non-200 answer is its own error class; phase errors do not
            // cover it.
            let event = format!("status_code_{}", status.as_u16());
            tracing::error!(event_type = %event, request_type = %label, "request failure in trace");
            self.sink
                .increment_counter(ERRORS_TOTAL, &[("event", event), ("type", label)]);
        }
    }

    fn record_failure(&self, trace: &TraceContext, err: &TransportError) {
        self.sink.increment_counter(
            HTTPCLIENT_REQUESTS_TOTAL,
            &[("code", ROUND_TRIP_ERROR.to_string()), ("type", trace.label().to_string())],
        );
        let counted = trace.count_error(ROUND_TRIP_ERROR);
        tracing::error!(
            event_type = ROUND_TRIP_ERROR,
            request_type = %trace.label(),
            already_accounted = !counted,
            err = %err,
            "request failure in trace"
        );
    }
}

impl std::fmt::Debug for InstrumentedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedTransport").finish_non_exhaustive()
    }
}
