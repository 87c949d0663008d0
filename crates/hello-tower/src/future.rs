//! Future implementation that manages the server span lifecycle.

use http::Response;
use opentelemetry::KeyValue;
use opentelemetry::metrics::Histogram;
use opentelemetry_semantic_conventions::attribute::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, HTTP_ROUTE, OTEL_STATUS_CODE,
    OTEL_STATUS_DESCRIPTION,
};
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::Span;

/// Duration histogram state carried from request to response.
pub(crate) struct RequestMetrics {
    pub(crate) histogram: Histogram<f64>,
    pub(crate) method: String,
    pub(crate) route: Option<String>,
    pub(crate) start: Instant,
}

/// Error carried in response extensions by handlers that turn their
/// failures into responses.
///
/// Frameworks such as axum convert handler errors into ordinary responses
/// before the middleware sees them. A handler that inserts this marker into
/// [`http::Extensions`] gets the error recorded on the server span, whatever
/// the response status.
///
/// ```
/// use hello_tower::HandlerError;
///
/// let mut response = http::Response::new(());
/// *response.status_mut() = http::StatusCode::BAD_REQUEST;
/// response.extensions_mut().insert(HandlerError::new("invalid log=\"x\""));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(String);

impl HandlerError {
    /// Wraps an error message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Future that wraps an instrumented handler.
///
/// The span is entered on every poll so spans created by the handler are
/// its children. On completion the span status is recorded and the span is
/// dropped, which ends it. If the future is dropped early the span still
/// ends with it.
#[pin_project]
pub struct HttpTracingFuture<F> {
    #[pin]
    inner: F,
    span: Option<Span>,
    metrics: Option<RequestMetrics>,
}

impl<F> HttpTracingFuture<F> {
    pub(crate) fn new(inner: F, span: Span, metrics: Option<RequestMetrics>) -> Self {
        Self {
            inner,
            span: Some(span),
            metrics,
        }
    }

    pub(crate) fn passthrough(inner: F) -> Self {
        Self {
            inner,
            span: None,
            metrics: None,
        }
    }
}

impl<F, B, E> Future for HttpTracingFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
    E: std::fmt::Display,
{
    type Output = Result<Response<B>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let poll_result = match this.span.as_ref() {
            Some(span) => {
                let _guard = span.enter();
                this.inner.poll(cx)
            }
            None => this.inner.poll(cx),
        };

        let Poll::Ready(result) = poll_result else {
            return Poll::Pending;
        };

        let status = result.as_ref().ok().map(|response| response.status().as_u16());

        if let Some(span) = this.span.take() {
            match &result {
                Ok(response) => {
                    span.record(
                        HTTP_RESPONSE_STATUS_CODE,
                        i64::from(response.status().as_u16()),
                    );
                    if let Some(error) = response.extensions().get::<HandlerError>() {
                        record_error(&span, error.message());
                    } else if response.status().is_server_error() {
                        span.record(OTEL_STATUS_CODE, "ERROR");
                    }
                }
                Err(e) => record_error(&span, &e.to_string()),
            }
        }

        if let Some(metrics) = this.metrics.take() {
            let mut attributes = vec![KeyValue::new(HTTP_REQUEST_METHOD, metrics.method)];
            if let Some(route) = metrics.route {
                attributes.push(KeyValue::new(HTTP_ROUTE, route));
            }
            if let Some(status) = status {
                attributes.push(KeyValue::new(HTTP_RESPONSE_STATUS_CODE, i64::from(status)));
            }
            metrics
                .histogram
                .record(metrics.start.elapsed().as_secs_f64(), &attributes);
        }

        Poll::Ready(result)
    }
}

fn record_error(span: &Span, message: &str) {
    if !span.is_disabled() {
        tracing::error!(parent: span, exception.message = %message, "exception");
    }
    span.record(OTEL_STATUS_CODE, "ERROR");
    span.record(OTEL_STATUS_DESCRIPTION, message);
}
