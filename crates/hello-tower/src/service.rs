//! Tower Service implementation for HTTP request tracing.

use crate::config::HttpTracesMode;
use crate::future::{HttpTracingFuture, RequestMetrics};
use crate::layer::Settings;
use crate::propagation::extract_context;
use http::{Request, Response};
use opentelemetry::trace::TraceContextExt;
use opentelemetry_semantic_conventions::attribute::{CLIENT_ADDRESS, HTTP_ROUTE, SERVER_PORT};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::Service;
use tracing::Span;
use tracing::field::Empty;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Tower service that instruments an HTTP handler.
///
/// Created by [`HttpTracingLayer`](crate::HttpTracingLayer).
#[derive(Debug, Clone)]
pub struct HttpTracingService<S> {
    inner: S,
    settings: Arc<Settings>,
}

impl<S> HttpTracingService<S> {
    pub(crate) fn new(inner: S, settings: Arc<Settings>) -> Self {
        Self { inner, settings }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for HttpTracingService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: std::fmt::Display,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = HttpTracingFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let settings = &self.settings;

        if settings.ignore_paths.matches(req.uri().path()) {
            return HttpTracingFuture::passthrough(self.inner.call(req));
        }

        let route = matched_route(&req);

        let span = if settings.traces_enabled {
            server_span(settings, &req, route.as_deref())
        } else {
            Span::none()
        };

        let metrics = settings.duration.clone().map(|histogram| RequestMetrics {
            histogram,
            method: req.method().as_str().to_owned(),
            route,
            start: Instant::now(),
        });

        let future = {
            let _guard = span.enter();
            self.inner.call(req)
        };

        HttpTracingFuture::new(future, span, metrics)
    }
}

fn server_span<B>(settings: &Settings, req: &Request<B>, route: Option<&str>) -> Span {
    let method = req.method().as_str();
    let path = req.uri().path();
    let scheme = req.uri().scheme_str().unwrap_or("http");
    let name = settings.span_name_mode.span_name(method, route, path);

    let span = match settings.traces_mode {
        HttpTracesMode::Full => tracing::info_span!(
            "HTTP request",
            otel.name = %name,
            otel.kind = "server",
            otel.status_code = Empty,
            otel.status_description = Empty,
            http.request.method = %method,
            url.path = %path,
            url.scheme = %scheme,
            http.route = Empty,
            server.port = Empty,
            client.address = Empty,
            http.response.status_code = Empty,
        ),
        HttpTracesMode::Minimal => tracing::info_span!(
            "HTTP request",
            otel.name = %name,
            otel.kind = "server",
            otel.status_code = Empty,
            otel.status_description = Empty,
        ),
    };

    if settings.traces_mode == HttpTracesMode::Full {
        if let Some(route) = route {
            span.record(HTTP_ROUTE, route);
        }
        if let Some(port) = server_port(req) {
            span.record(SERVER_PORT, i64::from(port));
        }
        if settings.collect_client_ip
            && let Some(address) = client_address(req)
        {
            span.record(CLIENT_ADDRESS, address.as_str());
        }
    }

    if let Some(propagator) = &settings.propagator {
        let parent = extract_context(propagator, req.headers(), true);
        if parent.has_active_span() {
            let _ = span.set_parent(parent);
        }
    }

    span
}

fn server_port<B>(req: &Request<B>) -> Option<u16> {
    req.uri().port_u16().or_else(|| {
        req.headers()
            .get(http::header::HOST)
            .and_then(|host| host.to_str().ok())
            .and_then(|host| host.rsplit_once(':'))
            .and_then(|(_, port)| port.parse().ok())
    })
}

fn client_address<B>(req: &Request<B>) -> Option<String> {
    #[cfg(feature = "axum")]
    if let Some(axum::extract::ConnectInfo(addr)) = req
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
    {
        return Some(addr.ip().to_string());
    }

    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

#[cfg(feature = "axum")]
fn matched_route<B>(req: &Request<B>) -> Option<String> {
    req.extensions()
        .get::<axum::extract::MatchedPath>()
        .map(|path| path.as_str().to_owned())
}

#[cfg(not(feature = "axum"))]
fn matched_route<B>(_req: &Request<B>) -> Option<String> {
    None
}
