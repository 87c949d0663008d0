//! Error types for telemetry setup and teardown.

use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by individual teardown actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that abort telemetry setup.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TelemetryError {
    /// The collector endpoint could not be parsed.
    #[error("invalid OTLP endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// The configured endpoint value.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The shared gRPC channel could not be configured.
    #[error("failed to configure OTLP transport: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A signal exporter could not be built.
    #[error("failed to build {signal} exporter: {source}")]
    Exporter {
        /// Which signal the exporter was for.
        signal: &'static str,
        /// Underlying OTLP build error.
        #[source]
        source: opentelemetry_otlp::ExporterBuildError,
    },

    /// The global tracing subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Errors returned by [`ShutdownChain::shutdown`](crate::ShutdownChain::shutdown).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ShutdownError {
    /// Teardown did not finish within the caller's deadline; the remaining
    /// actions were abandoned.
    #[error("telemetry shutdown exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

/// Errors raised by the profiling bridge. Never fatal.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProfilingError {
    /// The binary was compiled without the `profiling` feature.
    #[error("profiling support is not compiled in (enable the `profiling` feature)")]
    Unsupported,

    /// The profiling agent failed to build, start or stop.
    #[error("profiling agent error: {0}")]
    Agent(String),
}
