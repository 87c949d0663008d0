//! Request handlers.

use crate::cache::Cache;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hello_tower::HandlerError;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Meter, ObservableCounter};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;

/// Name of the exported request counter.
pub const REQUEST_COUNT_METRIC: &str = "hello.request.count";

/// Route served by [`hello_virtual`].
pub const HELLO_VIRTUAL_ROUTE: &str = "/hello/virtual";

/// Cache key looked up on every request.
const LOOKUP_KEY: &str = "1";

/// Process-wide count of requests that reached [`hello_virtual`].
///
/// Incremented with a single relaxed atomic add. The metric pipeline reads
/// it through an observable counter on each export cycle; it is never reset.
#[derive(Debug, Clone, Default)]
pub struct RequestCounter(Arc<AtomicU64>);

impl RequestCounter {
    /// Adds one request.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Current total.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Exports the counter as [`REQUEST_COUNT_METRIC`] on `meter`.
    pub fn observe(&self, meter: &Meter) -> ObservableCounter<u64> {
        let counter = self.clone();
        let attributes = [KeyValue::new("endpoint", HELLO_VIRTUAL_ROUTE)];
        meter
            .u64_observable_counter(REQUEST_COUNT_METRIC)
            .with_description("Total number of /hello/virtual requests handled by this process")
            .with_callback(move |observer| observer.observe(counter.get(), &attributes))
            .build()
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct HelloState {
    inner: Arc<Inner>,
}

struct Inner {
    cache: Arc<dyn Cache>,
    requests: RequestCounter,
    handler_spans: bool,
    _request_count: ObservableCounter<u64>,
}

impl HelloState {
    /// Creates the state and registers the request counter on `meter`.
    pub fn new(cache: Arc<dyn Cache>, meter: &Meter, handler_spans: bool) -> Self {
        let requests = RequestCounter::default();
        let request_count = requests.observe(meter);
        Self {
            inner: Arc::new(Inner {
                cache,
                requests,
                handler_spans,
                _request_count: request_count,
            }),
        }
    }

    /// The request counter.
    pub fn requests(&self) -> &RequestCounter {
        &self.inner.requests
    }
}

/// Raw query parameters of `/hello/virtual`.
#[derive(Debug, Default, Deserialize)]
pub struct HelloQuery {
    log: Option<String>,
    sleep: Option<String>,
}

/// Validated query parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HelloParams {
    /// Emit a record describing the serving thread.
    pub log: bool,
    /// Seconds to sleep before answering.
    pub sleep_secs: u64,
}

impl HelloQuery {
    /// Validates the parameters. Blank values mean "absent".
    pub fn parse(&self) -> Result<HelloParams, HelloError> {
        let mut params = HelloParams::default();

        if let Some(log) = self.log.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            params.log = parse_strict_bool(log).ok_or_else(|| {
                HelloError::BadRequest(format!("invalid log={log:?} (expected true/false)"))
            })?;
        }

        if let Some(sleep) = self.sleep.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            params.sleep_secs = sleep.parse().map_err(|_| {
                HelloError::BadRequest(format!(
                    "invalid sleep={sleep:?} (expected non-negative integer seconds)"
                ))
            })?;
        }

        Ok(params)
    }
}

fn parse_strict_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Client-visible handler failures.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HelloError {
    /// A query parameter was malformed.
    #[error("{0}")]
    BadRequest(String),

    /// The cache had no value for the lookup key.
    #[error("value not found")]
    NotFound,
}

impl HelloError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for HelloError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let mut response = (self.status(), message.clone()).into_response();
        response.extensions_mut().insert(HandlerError::new(message));
        response
    }
}

/// `GET /hello/virtual?log=<bool>&sleep=<seconds>`
pub async fn hello_virtual(
    State(state): State<HelloState>,
    Query(query): Query<HelloQuery>,
) -> Result<String, HelloError> {
    state.inner.requests.increment();

    let work = virtual_greeting(&state, &query);
    let result = if state.inner.handler_spans {
        work.instrument(tracing::info_span!("hello.virtual")).await
    } else {
        work.await
    };

    if let Err(e) = &result {
        tracing::warn!(status = e.status().as_u16(), error = %e, "Request rejected");
    }
    result
}

async fn virtual_greeting(state: &HelloState, query: &HelloQuery) -> Result<String, HelloError> {
    let params = query.parse()?;

    if params.log {
        let thread = std::thread::current();
        let alive_tasks = tokio::runtime::Handle::try_current()
            .map(|handle| handle.metrics().num_alive_tasks())
            .unwrap_or_default();
        tracing::info!(
            pid = std::process::id(),
            thread_id = ?thread.id(),
            thread_name = thread.name().unwrap_or("unnamed"),
            alive_tasks,
            "Serving thread"
        );
    }

    if params.sleep_secs > 0 {
        tokio::time::sleep(Duration::from_secs(params.sleep_secs)).await;
    }

    let value = state
        .inner
        .cache
        .get(LOOKUP_KEY)
        .ok_or(HelloError::NotFound)?;

    Ok(format!("Hello from Rust REST {value}"))
}

/// Liveness and readiness probes. Always `200` with an empty body.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(log: Option<&str>, sleep: Option<&str>) -> HelloQuery {
        HelloQuery {
            log: log.map(str::to_string),
            sleep: sleep.map(str::to_string),
        }
    }

    #[test]
    fn test_params_default() {
        assert_eq!(query(None, None).parse(), Ok(HelloParams::default()));
        assert_eq!(
            query(Some(" "), Some("")).parse(),
            Ok(HelloParams::default())
        );
    }

    #[test]
    fn test_params_valid() {
        assert_eq!(
            query(Some("true"), Some("2")).parse(),
            Ok(HelloParams {
                log: true,
                sleep_secs: 2
            })
        );
        assert_eq!(query(Some("0"), None).parse().map(|p| p.log), Ok(false));
    }

    #[test]
    fn test_params_invalid() {
        assert!(matches!(
            query(Some("notabool"), None).parse(),
            Err(HelloError::BadRequest(_))
        ));
        assert!(matches!(
            query(None, Some("-1")).parse(),
            Err(HelloError::BadRequest(_))
        ));
        assert!(matches!(
            query(None, Some("1.5")).parse(),
            Err(HelloError::BadRequest(_))
        ));
    }

    #[test]
    fn test_error_response_carries_handler_error() {
        let response = HelloError::NotFound.into_response();
        assert_eq!(
            response
                .extensions()
                .get::<HandlerError>()
                .map(HandlerError::message),
            Some("value not found")
        );
    }

    #[test]
    fn test_error_status() {
        assert_eq!(
            HelloError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HelloError::NotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_request_counter() {
        let counter = RequestCounter::default();
        let clone = counter.clone();
        counter.increment();
        clone.increment();
        assert_eq!(counter.get(), 2);
    }
}
