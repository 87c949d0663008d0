//! Router assembly.

use crate::handlers::{HELLO_VIRTUAL_ROUTE, HelloState, health, hello_virtual};
use axum::Router;
use axum::routing::get;
use hello_tower::{HttpInstrumentationConfig, HttpTracingLayer};
use opentelemetry::metrics::Meter;

/// Builds the service routes.
///
/// When `http.enabled` is set the tracing middleware is attached with
/// [`Router::route_layer`], so it only runs for matched routes and sees the
/// route template.
pub fn router(state: HelloState, http: &HttpInstrumentationConfig, meter: &Meter) -> Router {
    let router = Router::new()
        .route(HELLO_VIRTUAL_ROUTE, get(hello_virtual))
        .route("/healthz", get(health))
        .route("/readyz", get(health))
        .route("/livez", get(health));

    let router = if http.enabled {
        router.route_layer(HttpTracingLayer::from_config(http, meter))
    } else {
        tracing::info!("HTTP instrumentation disabled (OTEL_HTTP_ENABLED=false)");
        router
    };

    router.with_state(state)
}
