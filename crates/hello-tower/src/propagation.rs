//! W3C trace-context extraction from request headers.

use http::HeaderMap;
use opentelemetry::Context;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::TraceContextExt;
use opentelemetry_sdk::propagation::TraceContextPropagator;

const TRACEPARENT: &str = "traceparent";
const TRACESTATE: &str = "tracestate";

/// Carrier exposing only `traceparent` and `tracestate`.
///
/// `get` borrows straight from the header map and `keys` returns the fixed
/// pair, so no header is copied.
#[derive(Debug, Clone, Copy)]
pub struct TraceContextCarrier<'a>(pub &'a HeaderMap);

impl Extractor for TraceContextCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        match key {
            TRACEPARENT | TRACESTATE => self.0.get(key).and_then(|v| v.to_str().ok()),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<&str> {
        vec![TRACEPARENT, TRACESTATE]
    }
}

/// Extracts the remote parent from `headers`.
///
/// Returns an empty context when propagation is disabled or the headers carry
/// no valid trace context.
pub fn extract_context(
    propagator: &TraceContextPropagator,
    headers: &HeaderMap,
    enabled: bool,
) -> Context {
    if !enabled {
        return Context::new();
    }

    let cx = propagator.extract_with_context(&Context::new(), &TraceContextCarrier(headers));
    if cx.span().span_context().is_valid() {
        cx
    } else {
        Context::new()
    }
}
