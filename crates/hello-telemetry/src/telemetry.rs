//! The live telemetry handle.
//!
//! [`Telemetry::setup`] turns a [`TelemetryConfig`] into running pipelines
//! attached to one shared transport, registering a teardown for every
//! component as it is created. The handle is owned by the process entry
//! point, which passes providers down explicitly and calls
//! [`Telemetry::shutdown`] once before exiting.

use crate::config::TelemetryConfig;
use crate::error::{ShutdownError, TelemetryError};
use crate::pipeline;
use crate::profiling::{Profiler, SpanProfilingLayer};
use crate::resource::build_resource;
use crate::runtime_metrics;
use crate::sampler::select_sampler;
use crate::shutdown::ShutdownChain;
use crate::transport::Transport;
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::time::Duration;

/// Running telemetry pipelines plus their ordered teardown.
///
/// When no endpoint is configured the handle is *disabled*: there is no
/// tracer or logger provider, and the meter provider has no reader so every
/// instrument is a no-op.
///
/// # Example
///
/// ```no_run
/// use hello_telemetry::{Telemetry, TelemetryConfig};
/// use std::time::Duration;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let telemetry = Telemetry::setup(&TelemetryConfig::default())?;
/// hello_telemetry::logging::init("info", &telemetry)?;
///
/// let meter = telemetry.meter("hello");
/// // ... serve traffic ...
///
/// telemetry.shutdown(Duration::from_secs(5)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Telemetry {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: SdkMeterProvider,
    logger_provider: Option<SdkLoggerProvider>,
    span_profiling: Option<SpanProfilingLayer>,
    shutdown: ShutdownChain,
}

impl Telemetry {
    /// Builds every enabled pipeline.
    ///
    /// An empty endpoint returns a disabled handle. A malformed endpoint or a
    /// failure to build an exporter is returned as an error; anything already
    /// created is torn down before returning. A profiler that fails to start
    /// only logs a warning.
    ///
    /// Must be called from within a tokio runtime.
    pub fn setup(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        if config.exporter.endpoint.trim().is_empty() {
            tracing::info!(target: "otel_lifecycle", "No OTLP endpoint configured; telemetry disabled");
            return Ok(Self::disabled());
        }

        let shutdown = ShutdownChain::new();
        let resource = build_resource(&config.resource);

        let transport = Transport::connect(&config.exporter)?;
        tracing::info!(
            target: "otel_lifecycle",
            target_address = transport.target(),
            insecure = transport.is_insecure(),
            "OTLP transport configured"
        );

        let tracer_provider = pipeline::build_tracer_provider(
            &transport,
            resource.clone(),
            select_sampler(&config.traces.sampler, config.traces.sampler_arg),
        )?;
        {
            let transport = transport.clone();
            shutdown.push("transport", move || {
                drop(transport);
                Ok(())
            });
        }
        {
            let provider = tracer_provider.clone();
            shutdown.push("traces", move || {
                if let Err(e) = provider.force_flush() {
                    tracing::warn!(target: "otel_lifecycle", error = %e, "Failed to flush tracer provider");
                }
                provider.shutdown()?;
                Ok(())
            });
        }

        let span_profiling = if config.profiling.is_active() {
            match Profiler::start(&config.profiling) {
                Ok(profiler) => {
                    let layer = profiler.layer();
                    shutdown.push("profiler", move || Ok(profiler.stop()?));
                    Some(layer)
                }
                Err(e) => {
                    tracing::warn!(target: "otel_lifecycle", error = %e, "Profiler failed to start; continuing without profiling");
                    None
                }
            }
        } else {
            None
        };

        let meter_provider =
            match pipeline::build_meter_provider(&transport, resource.clone(), &config.metrics)? {
                Some(provider) => {
                    let teardown = provider.clone();
                    shutdown.push("metrics", move || {
                        teardown.shutdown()?;
                        Ok(())
                    });
                    runtime_metrics::register(
                        &provider.meter("hello-telemetry"),
                        config.metrics.runtime_metrics,
                        config.metrics.schedule_metrics,
                    );
                    provider
                }
                None => noop_meter_provider(),
            };

        let logger_provider = if config.logs.enabled {
            let provider = pipeline::build_logger_provider(&transport, resource)?;
            let teardown = provider.clone();
            shutdown.push("logs", move || {
                teardown.shutdown()?;
                Ok(())
            });
            Some(provider)
        } else {
            None
        };

        tracing::info!(
            target: "otel_lifecycle",
            sampler = %config.traces.sampler,
            metrics = config.metrics.is_active(),
            logs = logger_provider.is_some(),
            profiling = span_profiling.is_some(),
            "Telemetry pipelines started"
        );

        Ok(Self {
            tracer_provider: Some(tracer_provider),
            meter_provider,
            logger_provider,
            span_profiling,
            shutdown,
        })
    }

    /// A handle with no pipelines. Shutdown is a no-op.
    pub fn disabled() -> Self {
        Self {
            tracer_provider: None,
            meter_provider: noop_meter_provider(),
            logger_provider: None,
            span_profiling: None,
            shutdown: ShutdownChain::new(),
        }
    }

    /// Whether an endpoint was configured and pipelines are running.
    pub fn is_enabled(&self) -> bool {
        self.tracer_provider.is_some()
    }

    /// The trace provider, when telemetry is enabled.
    pub fn tracer_provider(&self) -> Option<&SdkTracerProvider> {
        self.tracer_provider.as_ref()
    }

    /// The meter provider. Never absent; a no-op when metrics are off.
    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.meter_provider
    }

    /// A meter scoped to `name`.
    pub fn meter(&self, name: &'static str) -> Meter {
        self.meter_provider.meter(name)
    }

    /// The remote log sink, when the log pipeline is active.
    pub fn logger_provider(&self) -> Option<&SdkLoggerProvider> {
        self.logger_provider.as_ref()
    }

    /// The profiling layer, when the profiler started.
    pub fn span_profiling_layer(&self) -> Option<SpanProfilingLayer> {
        self.span_profiling.clone()
    }

    /// Tears every component down in reverse creation order within
    /// `deadline`. Calling it again is a no-op.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ShutdownError> {
        self.shutdown.shutdown(deadline).await
    }
}

fn noop_meter_provider() -> SdkMeterProvider {
    SdkMeterProvider::builder().build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExporterConfig, MetricsConfig};

    fn enabled_config() -> TelemetryConfig {
        TelemetryConfig {
            exporter: ExporterConfig {
                endpoint: "127.0.0.1:4317".to_string(),
                insecure: true,
            },
            ..TelemetryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_empty_endpoint_disables_telemetry() {
        let telemetry = Telemetry::setup(&TelemetryConfig::default()).unwrap();

        assert!(!telemetry.is_enabled());
        assert!(telemetry.tracer_provider().is_none());
        assert!(telemetry.logger_provider().is_none());
        assert!(telemetry.span_profiling_layer().is_none());

        telemetry.shutdown(Duration::from_secs(1)).await.unwrap();
        telemetry.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_enabled_setup_registers_pipelines() {
        let mut config = enabled_config();
        config.logs.enabled = true;

        let telemetry = Telemetry::setup(&config).unwrap();

        assert!(telemetry.is_enabled());
        assert!(telemetry.tracer_provider().is_some());
        assert!(telemetry.logger_provider().is_some());
        assert_eq!(telemetry.shutdown.len(), 4);

        telemetry.shutdown(Duration::from_secs(10)).await.unwrap();
        telemetry.shutdown(Duration::from_secs(10)).await.unwrap();
        assert!(telemetry.shutdown.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_zero_interval_skips_metric_pipeline() {
        let config = TelemetryConfig {
            metrics: MetricsConfig {
                export_interval: Duration::ZERO,
                ..MetricsConfig::default()
            },
            ..enabled_config()
        };

        let telemetry = Telemetry::setup(&config).unwrap();

        // transport + traces only
        assert_eq!(telemetry.shutdown.len(), 2);
        telemetry.shutdown(Duration::from_secs(10)).await.unwrap();
    }

    #[cfg(not(feature = "profiling"))]
    #[tokio::test]
    async fn test_profiler_start_failure_is_not_fatal() {
        let mut config = enabled_config();
        config.profiling.enabled = Some(true);
        config.profiling.server_address = "not a url".to_string();
        config.profiling.application_name = "hello".to_string();

        let telemetry = Telemetry::setup(&config).unwrap();

        assert!(telemetry.is_enabled());
        assert!(telemetry.span_profiling_layer().is_none());
    }

    #[tokio::test]
    async fn test_malformed_endpoint_is_fatal() {
        let config = TelemetryConfig {
            exporter: ExporterConfig {
                endpoint: "http://".to_string(),
                insecure: true,
            },
            ..TelemetryConfig::default()
        };

        assert!(matches!(
            Telemetry::setup(&config),
            Err(TelemetryError::InvalidEndpoint { .. })
        ));
    }
}
