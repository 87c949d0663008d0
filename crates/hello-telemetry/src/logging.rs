//! Local and remote log sinks.
//!
//! Records always go to a JSON stream on stdout. When the log pipeline is
//! active they are also bridged into OTLP; the bridge drops records emitted by
//! the export stack itself so exporting can never feed back into itself.

use crate::error::TelemetryError;
use crate::profiling;
use crate::telemetry::Telemetry;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// Targets never bridged into the OTLP log pipeline.
const EXPORT_STACK_TARGETS: &[&str] = &["h2", "hyper", "tonic", "tower", "opentelemetry"];

/// Normalises a `LOG_LEVEL` value. Anything unrecognised means `info`.
pub fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Builds the filter directive string: `RUST_LOG` when set, otherwise the
/// normalised `level`, plus the profiling client directive if any.
pub fn filter_directives(level: &str, profiling_log_level: &str) -> String {
    let base = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| normalize_level(level).to_string());

    match profiling::log_directive(profiling_log_level) {
        Some(directive) => format!("{base},{directive}"),
        None => base,
    }
}

fn env_filter(level: &str, profiling_log_level: &str) -> EnvFilter {
    let directives = filter_directives(level, profiling_log_level);
    EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("Invalid log filter {directives:?} ({e}); falling back to info");
        EnvFilter::new("info")
    })
}

/// Whether records from `target` may be exported through the OTLP log
/// bridge.
pub fn is_exportable(target: &str) -> bool {
    !EXPORT_STACK_TARGETS
        .iter()
        .any(|excluded| target.starts_with(excluded))
}

/// Subscriber used while configuration is loaded and telemetry is set up.
///
/// Install it with [`tracing::subscriber::with_default`] so it is replaced
/// by [`init`] afterwards.
pub fn bootstrap_subscriber(level: &str) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_env_filter(env_filter(level, "info"))
        .finish()
}

/// Installs the process-wide subscriber.
///
/// The local JSON sink is always present. The span exporter, the profiling
/// layer and the OTLP log bridge are added when `telemetry` provides them.
pub fn init(level: &str, telemetry: &Telemetry) -> Result<(), TelemetryError> {
    init_with_profiling_level(level, "info", telemetry)
}

/// Like [`init`], with an explicit verbosity for the profiling client.
pub fn init_with_profiling_level(
    level: &str,
    profiling_log_level: &str,
    telemetry: &Telemetry,
) -> Result<(), TelemetryError> {
    let filter = env_filter(level, profiling_log_level);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_target(true);

    let trace_layer = telemetry.tracer_provider().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer("hello-telemetry"))
    });

    let log_bridge = telemetry.logger_provider().map(|provider| {
        OpenTelemetryTracingBridge::new(provider)
            .with_filter(filter_fn(|metadata| is_exportable(metadata.target())))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(trace_layer)
        .with(telemetry.span_profiling_layer())
        .with(log_bridge)
        .try_init()?;

    Ok(())
}
