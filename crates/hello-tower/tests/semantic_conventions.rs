//! Integration tests validating exported server spans.
//!
//! Requests are driven through instrumented services while a
//! `tracing-opentelemetry` subscriber exports into an in-memory exporter, and
//! the finished spans are checked against HTTP semantic conventions.

use axum::Router;
use axum::body::Body;
use axum::routing::get;
use hello_tower::{
    HandlerError, HttpInstrumentationConfig, HttpTracesMode, HttpTracingLayer, SpanNameMode,
};
use http::{Request, Response, StatusCode};
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::trace::{SpanId, SpanKind, Status, TraceId, TracerProvider as _};
use opentelemetry::{Key, Value};
use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use opentelemetry_semantic_conventions::attribute::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, HTTP_ROUTE, URL_PATH, URL_SCHEME,
};
use tower::{Layer, ServiceExt};
use tracing_subscriber::layer::SubscriberExt;

const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

struct TestTracing {
    exporter: InMemorySpanExporter,
    provider: SdkTracerProvider,
    _guard: tracing::subscriber::DefaultGuard,
}

impl TestTracing {
    fn install() -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("test")));
        let guard = tracing::subscriber::set_default(subscriber);

        Self {
            exporter,
            provider,
            _guard: guard,
        }
    }

    fn spans(&self) -> Vec<SpanData> {
        self.provider.force_flush().unwrap();
        self.exporter.get_finished_spans().unwrap()
    }
}

fn attr(span: &SpanData, key: &str) -> Option<Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key == Key::from(key.to_owned()))
        .map(|kv| kv.value.clone())
}

fn request(path: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .header("host", "localhost:8080")
        .header("traceparent", TRACEPARENT)
        .body(Body::empty())
        .unwrap()
}

fn app(layer: HttpTracingLayer) -> Router {
    Router::new()
        .route("/users/{id}", get(|| async { "user" }))
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "broken") }),
        )
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/rejected",
            get(|| async {
                let mut response = Response::new(Body::from("invalid id"));
                *response.status_mut() = StatusCode::BAD_REQUEST;
                response
                    .extensions_mut()
                    .insert(HandlerError::new("invalid id"));
                response
            }),
        )
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route_layer(layer)
}

#[tokio::test]
async fn test_full_mode_attributes() {
    let harness = TestTracing::install();

    let layer = HttpTracingLayer::builder()
        .span_name_mode(SpanNameMode::MethodRoute)
        .build();
    let response = app(layer).oneshot(request("/users/42")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let spans = harness.spans();
    assert_eq!(spans.len(), 1);
    let span = &spans[0];

    assert_eq!(span.name, "GET /users/{id}");
    assert_eq!(span.span_kind, SpanKind::Server);
    assert_eq!(span.status, Status::Unset);
    assert_eq!(attr(span, HTTP_REQUEST_METHOD), Some(Value::from("GET")));
    assert_eq!(attr(span, URL_PATH), Some(Value::from("/users/42")));
    assert_eq!(attr(span, URL_SCHEME), Some(Value::from("http")));
    assert_eq!(attr(span, HTTP_ROUTE), Some(Value::from("/users/{id}")));
    assert_eq!(attr(span, "server.port"), Some(Value::I64(8080)));
    assert_eq!(attr(span, HTTP_RESPONSE_STATUS_CODE), Some(Value::I64(200)));
    assert_eq!(attr(span, "client.address"), None);
}

#[tokio::test]
async fn test_remote_parent_is_honoured() {
    let harness = TestTracing::install();

    app(HttpTracingLayer::new())
        .oneshot(request("/users/42"))
        .await
        .unwrap();

    let spans = harness.spans();
    let span = &spans[0];

    assert_eq!(span.name, "http.request");
    assert_eq!(
        span.span_context.trace_id(),
        TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
    );
    assert_eq!(
        span.parent_span_id,
        SpanId::from_hex("00f067aa0ba902b7").unwrap()
    );
}

#[tokio::test]
async fn test_disabled_propagation_starts_new_trace() {
    let harness = TestTracing::install();

    let layer = HttpTracingLayer::builder().propagation(false).build();
    app(layer).oneshot(request("/users/42")).await.unwrap();

    let spans = harness.spans();
    let span = &spans[0];

    assert_ne!(
        span.span_context.trace_id(),
        TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
    );
    assert_eq!(span.parent_span_id, SpanId::INVALID);
}

#[tokio::test]
async fn test_ignored_paths_produce_no_span() {
    let harness = TestTracing::install();

    let response = app(HttpTracingLayer::new())
        .oneshot(request("/healthz"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(harness.spans().is_empty());
}

#[tokio::test]
async fn test_server_error_marks_span() {
    let harness = TestTracing::install();

    app(HttpTracingLayer::new())
        .oneshot(request("/broken"))
        .await
        .unwrap();
    app(HttpTracingLayer::new())
        .oneshot(request("/missing"))
        .await
        .unwrap();

    let spans = harness.spans();
    assert_eq!(spans.len(), 2);

    assert!(matches!(spans[0].status, Status::Error { .. }));
    assert_eq!(attr(&spans[0], HTTP_RESPONSE_STATUS_CODE), Some(Value::I64(500)));

    assert_eq!(spans[1].status, Status::Unset);
    assert_eq!(attr(&spans[1], HTTP_RESPONSE_STATUS_CODE), Some(Value::I64(404)));
}

#[tokio::test]
async fn test_handler_error_is_recorded() {
    let harness = TestTracing::install();

    let handler = tower::service_fn(|_req: Request<()>| async {
        Err::<Response<()>, _>(std::io::Error::other("database unavailable"))
    });
    let result = HttpTracingLayer::new()
        .layer(handler)
        .oneshot(Request::new(()))
        .await;
    assert!(result.is_err());

    let spans = harness.spans();
    let span = &spans[0];

    assert!(matches!(span.status, Status::Error { .. }));
    assert!(span.events.iter().any(|event| event.name == "exception"));
}

#[tokio::test]
async fn test_error_response_marks_span() {
    let harness = TestTracing::install();

    for mode in [HttpTracesMode::Full, HttpTracesMode::Minimal] {
        let layer = HttpTracingLayer::builder().traces_mode(mode).build();
        let response = app(layer).oneshot(request("/rejected")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let spans = harness.spans();
    assert_eq!(spans.len(), 2);
    for span in &spans {
        assert!(matches!(span.status, Status::Error { .. }));
        assert!(span.events.iter().any(|event| event.name == "exception"));
    }
}

#[tokio::test]
async fn test_minimal_mode_has_no_http_attributes() {
    let harness = TestTracing::install();

    let layer = HttpTracingLayer::builder()
        .traces_mode(HttpTracesMode::Minimal)
        .span_name_mode(SpanNameMode::Path)
        .build();
    app(layer).oneshot(request("/broken")).await.unwrap();

    let spans = harness.spans();
    let span = &spans[0];

    assert_eq!(span.name, "/broken");
    assert_eq!(span.span_kind, SpanKind::Server);
    assert!(matches!(span.status, Status::Error { .. }));
    assert_eq!(attr(span, HTTP_REQUEST_METHOD), None);
    assert_eq!(attr(span, HTTP_RESPONSE_STATUS_CODE), None);
}

#[tokio::test]
async fn test_traces_disabled_produces_no_span() {
    let harness = TestTracing::install();

    let layer = HttpTracingLayer::builder().traces_enabled(false).build();
    let response = app(layer).oneshot(request("/users/1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(harness.spans().is_empty());
}

#[tokio::test]
async fn test_client_address_from_forwarded_header() {
    let harness = TestTracing::install();

    let layer = HttpTracingLayer::builder().collect_client_ip(true).build();
    let mut req = request("/users/1");
    req.headers_mut()
        .insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
    app(layer).oneshot(req).await.unwrap();

    let spans = harness.spans();
    assert_eq!(
        attr(&spans[0], "client.address"),
        Some(Value::from("203.0.113.7"))
    );
}

#[tokio::test]
async fn test_request_duration_histogram() {
    let exporter = InMemoryMetricExporter::default();
    let provider = SdkMeterProvider::builder()
        .with_reader(PeriodicReader::builder(exporter.clone()).build())
        .build();

    let config = HttpInstrumentationConfig {
        metrics_enabled: true,
        traces_enabled: false,
        ..HttpInstrumentationConfig::default()
    };
    let layer = HttpTracingLayer::from_config(&config, &provider.meter("test"));

    let router = app(layer);
    router.clone().oneshot(request("/users/1")).await.unwrap();
    router.clone().oneshot(request("/users/2")).await.unwrap();
    router.oneshot(request("/healthz")).await.unwrap();

    provider.force_flush().unwrap();
    let metrics = exporter.get_finished_metrics().unwrap();

    let metric = metrics
        .iter()
        .flat_map(|rm| rm.scope_metrics())
        .flat_map(|sm| sm.metrics())
        .find(|m| m.name() == "http.server.request.duration")
        .expect("duration histogram exported");

    assert_eq!(metric.unit(), "s");
    let AggregatedMetrics::F64(MetricData::Histogram(histogram)) = metric.data() else {
        panic!("expected an f64 histogram");
    };

    let points: Vec<_> = histogram.data_points().collect();
    assert_eq!(points.len(), 1, "both requests share one attribute set");
    assert_eq!(points[0].count(), 2);

    let route = points[0]
        .attributes()
        .find(|kv| kv.key.as_str() == HTTP_ROUTE)
        .map(|kv| kv.value.clone());
    assert_eq!(route, Some(Value::from("/users/{id}")));
}
