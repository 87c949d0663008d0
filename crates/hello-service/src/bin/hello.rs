//! The `hello` benchmark server.
//!
//! Startup order: configuration, telemetry, logging, boot diagnostics, cache,
//! router, listener. Any failure before the listener is bound exits non-zero.
//! On SIGINT/SIGTERM the server drains, the cache is torn down, and telemetry
//! is flushed with whatever is left of the grace period.

use anyhow::Context;
use hello_service::app;
use hello_service::config::Config;
use hello_service::diagnostics::{BootReport, ProbeRoots};
use hello_service::handlers::HelloState;
use hello_service::{cache, server};
use hello_telemetry::{Telemetry, logging};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Lower bound for the telemetry flush, even when draining used the whole
/// grace period.
const MIN_TELEMETRY_FLUSH: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let bootstrap_level = std::env::var("LOG_LEVEL").unwrap_or_default();
    let (config, telemetry) = tracing::subscriber::with_default(
        logging::bootstrap_subscriber(&bootstrap_level),
        || -> anyhow::Result<_> {
            let config = Config::load().context("failed to load configuration")?;
            let telemetry =
                Telemetry::setup(&config.telemetry).context("failed to set up telemetry")?;
            Ok((config, telemetry))
        },
    )?;

    logging::init_with_profiling_level(
        &config.server.log_level,
        &config.telemetry.profiling.log_level,
        &telemetry,
    )
    .context("failed to install log subscriber")?;

    BootReport::collect(&config, &ProbeRoots::default()).emit();

    let cache = cache::build(&config.cache.implementation, config.cache.size)
        .context("failed to build cache")?;
    tracing::info!(
        implementation = %config.cache.implementation,
        size = cache.cache.size(),
        "Cache ready"
    );

    let meter = telemetry.meter("hello-service");
    let state = HelloState::new(
        cache.cache.clone(),
        &meter,
        config.app.handler_spans_enabled,
    );
    let router = app::router(state, &config.http, &meter);

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "Listening");

    let token = CancellationToken::new();
    let signals = tokio::spawn(server::shutdown_signal(token.clone()));
    let shutdown_started = tokio::spawn({
        let token = token.clone();
        async move {
            token.cancelled().await;
            Instant::now()
        }
    });

    let served = server::run(listener, router, token.clone(), server::GRACE_PERIOD).await;
    token.cancel();
    let _ = signals.await;
    let started = shutdown_started.await.unwrap_or_else(|_| Instant::now());

    if let Err(e) = &served {
        tracing::error!(error = %e, "Server stopped with an error");
    }

    cache.close();

    let remaining = server::GRACE_PERIOD
        .saturating_sub(started.elapsed())
        .max(MIN_TELEMETRY_FLUSH);
    if let Err(e) = telemetry.shutdown(remaining).await {
        tracing::warn!(error = %e, "Telemetry shutdown incomplete");
    }

    tracing::info!("Shutdown complete");
    served.context("server error")
}
