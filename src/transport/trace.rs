//! Per-probe request tracing.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::observability::metrics::{ERRORS_TOTAL, HTTPCLIENT_TRACE_REQUEST_DURATION};
use crate::observability::MetricsSink;

/// Connection-lifecycle phase of an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceEvent {
    GotConn,
    DnsStart,
    DnsDone,
    ConnectStart,
    ConnectDone,
    TlsHandshakeStart,
    TlsHandshakeDone,
    WroteRequest,
    GotFirstResponseByte,
}

impl TraceEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceEvent::GotConn => "got_conn",
            TraceEvent::DnsStart => "dns_start",
            TraceEvent::DnsDone => "dns_done",
            TraceEvent::ConnectStart => "connect_start",
            TraceEvent::ConnectDone => "connect_done",
            TraceEvent::TlsHandshakeStart => "tls_handshake_start",
            TraceEvent::TlsHandshakeDone => "tls_handshake_done",
            TraceEvent::WroteRequest => "wrote_request",
            TraceEvent::GotFirstResponseByte => "got_first_resp_byte",
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State carried through one instrumented call: the check label, the call
/// start and whether an error has already been counted for it.
///
/// Phase hooks and the final outcome handler may race; the flag is only
/// ever flipped false → true with a single atomic swap.
pub struct TraceContext {
    label: String,
    start: Instant,
    error_accounted: AtomicBool,
    sink: Arc<dyn MetricsSink>,
}

impl TraceContext {
    pub fn new(label: impl Into<String>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            label: label.into(),
            start: Instant::now(),
            error_accounted: AtomicBool::new(false),
            sink,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Time since the call started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn error_accounted(&self) -> bool {
        self.error_accounted.load(Ordering::Acquire)
    }

    /// A phase completed: record its offset from the call start.
    pub fn record(&self, event: TraceEvent) {
        self.sink.observe_histogram(
            HTTPCLIENT_TRACE_REQUEST_DURATION,
            &[("event", event.as_str().to_string()), ("type", self.label.clone())],
            self.elapsed().as_secs_f64(),
        );
    }

    /// A phase failed. The duration sample is suppressed and the error is
    /// counted unless an earlier phase already counted one for this call.
    pub fn record_error(&self, event: TraceEvent, err: &dyn fmt::Display) {
        tracing::error!(
            event_type = event.as_str(),
            request_type = %self.label,
            err = %err,
            "request failure in trace"
        );
        self.count_error(event.as_str());
    }

    /// Count `event` on the error counter if this call has no counted error
    /// yet. Returns whether this call did the counting.
    pub(crate) fn count_error(&self, event: &str) -> bool {
        if self.error_accounted.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.sink.increment_counter(
            ERRORS_TOTAL,
            &[("event", event.to_string()), ("type", self.label.clone())],
        );
        true
    }
}

impl fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceContext")
            .field("label", &self.label)
            .field("error_accounted", &self.error_accounted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::RecordingSink;

    #[test]
    fn test_success_records_duration() {
        let sink = Arc::new(RecordingSink::new());
        let trace = TraceContext::new("me_ingress", sink.clone());

        trace.record(TraceEvent::DnsStart);
        trace.record(TraceEvent::DnsDone);

        assert_eq!(
            sink.histogram_count(HTTPCLIENT_TRACE_REQUEST_DURATION, &[("event", "dns_done"), ("type", "me_ingress")]),
            1
        );
        assert!(!trace.error_accounted());
    }

    #[test]
    fn test_only_first_error_is_counted() {
        let sink = Arc::new(RecordingSink::new());
        let trace = TraceContext::new("path_node-a", sink.clone());

        trace.record_error(TraceEvent::ConnectDone, &"connection refused");
        trace.record_error(TraceEvent::WroteRequest, &"broken pipe");

        assert!(trace.error_accounted());
        assert_eq!(sink.counter(ERRORS_TOTAL, &[("type", "path_node-a")]), 1);
        assert_eq!(sink.counter(ERRORS_TOTAL, &[("event", "connect_done")]), 1);
        assert_eq!(sink.histogram_count(HTTPCLIENT_TRACE_REQUEST_DURATION, &[]), 0);
    }

    #[test]
    fn test_concurrent_errors_count_once() {
        let sink = Arc::new(RecordingSink::new());
        let trace = Arc::new(TraceContext::new("me_service", sink.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let trace = trace.clone();
                std::thread::spawn(move || trace.count_error("round_trip_error"))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(sink.counter(ERRORS_TOTAL, &[]), 1);
    }
}
