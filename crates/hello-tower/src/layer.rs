//! Tower Layer implementation for HTTP request tracing.

use crate::config::{HttpInstrumentationConfig, HttpTracesMode};
use crate::ignore::IgnorePaths;
use crate::service::HttpTracingService;
use crate::span_name::SpanNameMode;
use opentelemetry::metrics::{Histogram, Meter};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_semantic_conventions::metric::HTTP_SERVER_REQUEST_DURATION;
use std::sync::Arc;
use tower::Layer;

/// Settings shared by every clone of the service.
#[derive(Debug)]
pub(crate) struct Settings {
    pub(crate) span_name_mode: SpanNameMode,
    pub(crate) ignore_paths: IgnorePaths,
    pub(crate) propagator: Option<TraceContextPropagator>,
    pub(crate) traces_enabled: bool,
    pub(crate) traces_mode: HttpTracesMode,
    pub(crate) collect_client_ip: bool,
    pub(crate) duration: Option<Histogram<f64>>,
}

/// Tower layer that traces inbound HTTP requests.
///
/// Per request, the wrapped service:
/// - skips everything for paths in the ignore set
/// - extracts the W3C parent context from `traceparent`/`tracestate`
/// - opens a server span named by the [`SpanNameMode`]
/// - marks the span as errored on handler error or a 5xx response
/// - optionally records `http.server.request.duration`
///
/// # Example
///
/// ```
/// use hello_tower::{HttpTracingLayer, SpanNameMode};
/// use tower::ServiceBuilder;
///
/// let layer = HttpTracingLayer::builder()
///     .span_name_mode(SpanNameMode::MethodRoute)
///     .ignore_paths(["/healthz", "/metrics*"])
///     .build();
///
/// let service = ServiceBuilder::new()
///     .layer(layer)
///     .service_fn(|_req: http::Request<()>| async {
///         Ok::<_, std::convert::Infallible>(http::Response::new(()))
///     });
/// # let _ = service;
/// ```
#[derive(Debug, Clone)]
pub struct HttpTracingLayer {
    settings: Arc<Settings>,
}

impl HttpTracingLayer {
    /// Creates a layer with default settings and no duration histogram.
    pub fn new() -> Self {
        HttpTracingLayerBuilder::new().build()
    }

    /// Creates a builder for more detailed configuration.
    pub fn builder() -> HttpTracingLayerBuilder {
        HttpTracingLayerBuilder::new()
    }

    /// Creates a layer from configuration. The histogram is recorded on
    /// `meter` when `config.metrics_enabled` is set.
    pub fn from_config(config: &HttpInstrumentationConfig, meter: &Meter) -> Self {
        let builder = HttpTracingLayerBuilder::from_config(config);
        if config.metrics_enabled {
            builder.meter(meter).build()
        } else {
            builder.build()
        }
    }
}

impl Default for HttpTracingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for HttpTracingLayer {
    type Service = HttpTracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpTracingService::new(inner, Arc::clone(&self.settings))
    }
}

/// Builder for configuring an [`HttpTracingLayer`].
#[must_use = "builders do nothing unless .build() is called"]
pub struct HttpTracingLayerBuilder {
    span_name_mode: SpanNameMode,
    ignore_paths: IgnorePaths,
    propagation_enabled: bool,
    traces_enabled: bool,
    traces_mode: HttpTracesMode,
    collect_client_ip: bool,
    duration: Option<Histogram<f64>>,
}

impl HttpTracingLayerBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self::from_config(&HttpInstrumentationConfig::default())
    }

    /// Creates a builder seeded from configuration. No histogram is attached.
    pub fn from_config(config: &HttpInstrumentationConfig) -> Self {
        Self {
            span_name_mode: config.span_name_mode,
            ignore_paths: IgnorePaths::new(&config.ignore_paths),
            propagation_enabled: config.propagation_enabled,
            traces_enabled: config.traces_enabled,
            traces_mode: config.traces_mode,
            collect_client_ip: config.collect_client_ip,
            duration: None,
        }
    }

    /// Sets the span naming policy.
    ///
    /// Default: [`SpanNameMode::Constant`]
    pub fn span_name_mode(mut self, mode: SpanNameMode) -> Self {
        self.span_name_mode = mode;
        self
    }

    /// Replaces the ignore set.
    ///
    /// Default: `/healthz`, `/readyz`, `/livez`
    pub fn ignore_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        self.ignore_paths = IgnorePaths::new(paths);
        self
    }

    /// Sets whether incoming trace context is honoured.
    ///
    /// Default: `true`
    pub fn propagation(mut self, enabled: bool) -> Self {
        self.propagation_enabled = enabled;
        self
    }

    /// Sets whether server spans are created.
    ///
    /// Default: `true`
    pub fn traces_enabled(mut self, enabled: bool) -> Self {
        self.traces_enabled = enabled;
        self
    }

    /// Sets the attribute detail level.
    ///
    /// Default: [`HttpTracesMode::Full`]
    pub fn traces_mode(mut self, mode: HttpTracesMode) -> Self {
        self.traces_mode = mode;
        self
    }

    /// Sets whether `client.address` is recorded in full mode.
    ///
    /// Default: `false`
    pub fn collect_client_ip(mut self, enabled: bool) -> Self {
        self.collect_client_ip = enabled;
        self
    }

    /// Records `http.server.request.duration` (seconds) on `meter`.
    pub fn meter(mut self, meter: &Meter) -> Self {
        self.duration = Some(
            meter
                .f64_histogram(HTTP_SERVER_REQUEST_DURATION)
                .with_unit("s")
                .with_description("Duration of HTTP server requests")
                .build(),
        );
        self
    }

    /// Builds the configured layer.
    pub fn build(self) -> HttpTracingLayer {
        HttpTracingLayer {
            settings: Arc::new(Settings {
                span_name_mode: self.span_name_mode,
                ignore_paths: self.ignore_paths,
                propagator: self.propagation_enabled.then(TraceContextPropagator::new),
                traces_enabled: self.traces_enabled,
                traces_mode: self.traces_mode,
                collect_client_ip: self.collect_client_ip,
                duration: self.duration,
            }),
        }
    }
}

impl Default for HttpTracingLayerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
