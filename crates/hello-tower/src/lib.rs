//! Tower middleware that traces inbound HTTP requests with OpenTelemetry.
//!
//! [`HttpTracingLayer`] wraps any `tower::Service<http::Request<B>>` and, per
//! request, extracts W3C trace context, opens a server span named by a
//! configurable [`SpanNameMode`], and records the outcome on it. Paths in the
//! [`IgnorePaths`] set bypass instrumentation entirely.
//!
//! # Architecture
//!
//! The middleware uses the `tracing` crate as its primary API, with
//! `tracing-opentelemetry` bridging to OpenTelemetry for export. Spans are
//! `tracing` spans carrying `otel.*` fields, so nothing here talks to a
//! tracer provider directly: whichever subscriber the process installs
//! decides where spans go.
//!
//! # Usage
//!
//! ```no_run
//! use axum::{Router, routing::get};
//! use hello_tower::{HttpInstrumentationConfig, HttpTracingLayer};
//! use opentelemetry_sdk::metrics::SdkMeterProvider;
//! use opentelemetry::metrics::MeterProvider as _;
//!
//! let meter = SdkMeterProvider::builder().build().meter("hello");
//! let layer = HttpTracingLayer::from_config(&HttpInstrumentationConfig::default(), &meter);
//!
//! let app: Router = Router::new()
//!     .route("/users/{id}", get(|| async { "user" }))
//!     .route_layer(layer);
//! ```
//!
//! Attaching with `route_layer` makes the matched route template available
//! to the naming policy and the `http.route` attribute.
//!
//! # Features
//!
//! - `axum` - route templates from `MatchedPath` and client addresses from
//!   `ConnectInfo` (enabled by default)

mod config;
mod future;
mod ignore;
mod layer;
mod propagation;
mod service;
mod span_name;

pub use config::{HttpInstrumentationConfig, HttpTracesMode};
pub use future::{HandlerError, HttpTracingFuture};
pub use ignore::{IgnorePaths, IgnoreRule};
pub use layer::{HttpTracingLayer, HttpTracingLayerBuilder};
pub use propagation::{TraceContextCarrier, extract_context};
pub use service::HttpTracingService;
pub use span_name::{CONSTANT_SPAN_NAME, SpanNameMode};
