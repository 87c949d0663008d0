//! Signal pipeline construction.
//!
//! Every exporter is built on a clone of the [`Transport`] channel. Batching
//! limits for traces are fixed to bound memory under export backpressure.

use crate::config::{
    MetricsConfig, TRACE_MAX_EXPORT_BATCH_SIZE, TRACE_MAX_QUEUE_SIZE, TRACE_SCHEDULED_DELAY,
};
use crate::error::TelemetryError;
use crate::transport::Transport;
use opentelemetry_otlp::WithTonicConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{BatchLogProcessor, SdkLoggerProvider};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{
    BatchConfigBuilder as TraceBatchConfigBuilder, BatchSpanProcessor, Sampler,
    SdkTracerProvider,
};

/// Builds the trace provider with the fixed batching policy.
pub(crate) fn build_tracer_provider(
    transport: &Transport,
    resource: Resource,
    sampler: Sampler,
) -> Result<SdkTracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_channel(transport.channel())
        .build()
        .map_err(|source| TelemetryError::Exporter {
            signal: "trace",
            source,
        })?;

    let batch_config = TraceBatchConfigBuilder::default()
        .with_max_queue_size(TRACE_MAX_QUEUE_SIZE)
        .with_max_export_batch_size(TRACE_MAX_EXPORT_BATCH_SIZE)
        .with_scheduled_delay(TRACE_SCHEDULED_DELAY)
        .build();

    let span_processor = BatchSpanProcessor::builder(exporter)
        .with_batch_config(batch_config)
        .build();

    Ok(SdkTracerProvider::builder()
        .with_span_processor(span_processor)
        .with_sampler(sampler)
        .with_resource(resource)
        .build())
}

/// Builds the meter provider, or `None` when metrics are disabled or the
/// export interval is zero.
pub(crate) fn build_meter_provider(
    transport: &Transport,
    resource: Resource,
    config: &MetricsConfig,
) -> Result<Option<SdkMeterProvider>, TelemetryError> {
    if !config.is_active() {
        return Ok(None);
    }

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_channel(transport.channel())
        .build()
        .map_err(|source| TelemetryError::Exporter {
            signal: "metric",
            source,
        })?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(config.export_interval)
        .build();

    Ok(Some(
        SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(resource)
            .build(),
    ))
}

/// Builds the logger provider with batched delivery.
pub(crate) fn build_logger_provider(
    transport: &Transport,
    resource: Resource,
) -> Result<SdkLoggerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_channel(transport.channel())
        .build()
        .map_err(|source| TelemetryError::Exporter {
            signal: "log",
            source,
        })?;

    let log_processor = BatchLogProcessor::builder(exporter).build();

    Ok(SdkLoggerProvider::builder()
        .with_log_processor(log_processor)
        .with_resource(resource)
        .build())
}
