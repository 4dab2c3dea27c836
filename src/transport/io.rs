//! Stream wrapper reporting request-written and first-response-byte phases.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::transport::trace::{TraceContext, TraceEvent};

/// Wraps an established connection for the duration of one exchange.
///
/// `wrote_request` fires on the first successful flush after data was
/// written (or on the first write/flush error); `got_first_resp_byte` fires
/// on the first read that yields data.
pub(crate) struct TracedIo<'a, S> {
    inner: S,
    trace: &'a TraceContext,
    written: bool,
    wrote_reported: bool,
    first_byte_reported: bool,
}

impl<'a, S> TracedIo<'a, S> {
    pub(crate) fn new(inner: S, trace: &'a TraceContext) -> Self {
        Self {
            inner,
            trace,
            written: false,
            wrote_reported: false,
            first_byte_reported: false,
        }
    }

    fn report_write_error(&mut self, err: &io::Error) {
        if !self.wrote_reported {
            self.wrote_reported = true;
            self.trace.record_error(TraceEvent::WroteRequest, err);
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TracedIo<'_, S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            if !this.first_byte_reported && buf.filled().len() > before {
                this.first_byte_reported = true;
                this.trace.record(TraceEvent::GotFirstResponseByte);
            }
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TracedIo<'_, S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        match &poll {
            Poll::Ready(Ok(n)) if *n > 0 => this.written = true,
            Poll::Ready(Err(err)) => this.report_write_error(err),
            _ => {}
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        match &poll {
            Poll::Ready(Ok(())) if this.written && !this.wrote_reported => {
                this.wrote_reported = true;
                this.trace.record(TraceEvent::WroteRequest);
            }
            Poll::Ready(Err(err)) => this.report_write_error(err),
            _ => {}
        }
        poll
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics::HTTPCLIENT_TRACE_REQUEST_DURATION;
    use crate::observability::RecordingSink;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_reports_write_and_first_byte_once() {
        let sink = Arc::new(RecordingSink::new());
        let trace = TraceContext::new("me_service", sink.clone());
        let (client, mut server) = tokio::io::duplex(1024);
        let mut io = TracedIo::new(client, &trace);

        io.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        io.flush().await.unwrap();
        io.write_all(b"more").await.unwrap();
        io.flush().await.unwrap();

        server.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();
        let mut buf = [0u8; 8];
        io.read_exact(&mut buf).await.unwrap();
        io.read_exact(&mut buf).await.unwrap();

        assert_eq!(
            sink.histogram_count(HTTPCLIENT_TRACE_REQUEST_DURATION, &[("event", "wrote_request")]),
            1
        );
        assert_eq!(
            sink.histogram_count(HTTPCLIENT_TRACE_REQUEST_DURATION, &[("event", "got_first_resp_byte")]),
            1
        );
    }
}
