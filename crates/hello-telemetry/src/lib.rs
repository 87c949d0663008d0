//! Telemetry control plane for the hello benchmark service.
//!
//! This crate reconciles a set of independently toggleable signals (traces,
//! metrics, logs, profiling) into one consistent runtime:
//!
//! - **One transport** - a single lazily connected gRPC channel to the OTLP
//!   collector, shared by every exporter
//! - **Signal pipelines** - a batched trace pipeline, an optional periodic
//!   metric pipeline with tokio runtime gauges, and an optional log pipeline
//! - **Sampling policy** - selected from the `OTEL_TRACES_SAMPLER` vocabulary,
//!   falling back to `parentbased_always_on` on unknown names
//! - **Profiling bridge** - an optional Pyroscope agent whose samples are
//!   tagged with the active root span
//! - **Ordered shutdown** - every component registers a teardown as it is
//!   created; [`Telemetry::shutdown`] runs them in reverse within a deadline
//!
//! Nothing is installed globally except the `tracing` subscriber (see
//! [`logging::init`]). Providers are handed to the rest of the process through
//! the [`Telemetry`] handle.
//!
//! # Example
//!
//! ```no_run
//! use hello_telemetry::{Telemetry, TelemetryConfig, ExporterConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TelemetryConfig {
//!     exporter: ExporterConfig {
//!         endpoint: "otel-collector:4317".to_string(),
//!         insecure: true,
//!     },
//!     ..TelemetryConfig::default()
//! };
//!
//! let telemetry = Telemetry::setup(&config)?;
//! hello_telemetry::logging::init("info", &telemetry)?;
//!
//! tracing::info!("Application running");
//!
//! telemetry.shutdown(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
pub mod logging;
mod pipeline;
pub mod profiling;
mod resource;
pub mod runtime_metrics;
mod sampler;
mod shutdown;
mod telemetry;
mod transport;

pub use config::{
    ExporterConfig, LogsConfig, MetricsConfig, ProfilingConfig, ResourceConfig,
    TRACE_MAX_EXPORT_BATCH_SIZE, TRACE_MAX_QUEUE_SIZE, TRACE_SCHEDULED_DELAY, TelemetryConfig,
    TracesConfig, duration_ms,
};
pub use error::{BoxError, ProfilingError, ShutdownError, TelemetryError};
pub use resource::{HostDetector, ProcessDetector, build_resource};
pub use sampler::{SamplerMode, UnknownSamplerMode, clamp01, select_sampler};
pub use shutdown::ShutdownChain;
pub use telemetry::Telemetry;
pub use transport::{Transport, dial_target};
