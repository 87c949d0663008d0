//! Telemetry configuration.
//!
//! [`TelemetryConfig`] is an immutable snapshot of every enablement flag and
//! tunable consumed by [`Telemetry::setup`](crate::Telemetry::setup). It is
//! built once at startup (usually by the service's figment layers) and never
//! mutated afterwards.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum number of spans buffered before new spans are dropped.
pub const TRACE_MAX_QUEUE_SIZE: usize = 8192;
/// Maximum number of spans sent in a single export request.
pub const TRACE_MAX_EXPORT_BATCH_SIZE: usize = 1024;
/// Delay between two consecutive trace batch exports.
pub const TRACE_SCHEDULED_DELAY: Duration = Duration::from_secs(1);

/// Root telemetry configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// OTLP exporter (transport) settings.
    pub exporter: ExporterConfig,
    /// Resource identity.
    pub resource: ResourceConfig,
    /// Trace pipeline settings.
    pub traces: TracesConfig,
    /// Metric pipeline settings.
    pub metrics: MetricsConfig,
    /// Log pipeline settings.
    pub logs: LogsConfig,
    /// Continuous profiling settings.
    pub profiling: ProfilingConfig,
}

/// OTLP collector endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// `host:port` or URL of the collector. Empty disables telemetry.
    pub endpoint: String,
    /// Use a plaintext connection instead of TLS.
    pub insecure: bool,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            insecure: true,
        }
    }
}

/// Service identity merged into the telemetry resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// `service.name`.
    pub service_name: String,
    /// `service.version`.
    pub service_version: String,
    /// `service.instance.id`; omitted when empty.
    pub instance_id: String,
    /// `deployment.environment.name`; omitted when empty.
    pub deployment_environment: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            service_name: "rust".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            instance_id: String::new(),
            deployment_environment: String::new(),
        }
    }
}

/// Trace pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracesConfig {
    /// Sampler mode name, see [`SamplerMode`](crate::SamplerMode).
    pub sampler: String,
    /// Ratio argument for the ratio-based samplers.
    pub sampler_arg: f64,
}

impl Default for TracesConfig {
    fn default() -> Self {
        Self {
            sampler: "parentbased_always_on".to_string(),
            sampler_arg: 1.0,
        }
    }
}

/// Metric pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the metric pipeline is constructed at all.
    pub enabled: bool,
    /// Periodic export interval. Zero disables the pipeline.
    #[serde(with = "duration_ms")]
    pub export_interval: Duration,
    /// Register tokio runtime gauges (workers, alive tasks).
    pub runtime_metrics: bool,
    /// Register the scheduler backlog gauge (global queue depth).
    pub schedule_metrics: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            export_interval: Duration::from_secs(15),
            runtime_metrics: false,
            schedule_metrics: false,
        }
    }
}

impl MetricsConfig {
    /// Returns `true` when a real meter provider should be built.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.export_interval.is_zero()
    }
}

/// Log pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Bridge `tracing` events into OTLP logs.
    pub enabled: bool,
}

/// Continuous profiling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilingConfig {
    /// Explicit switch. When `None`, profiling is enabled only if both the
    /// server address and the application name are set.
    pub enabled: Option<bool>,
    /// Profiling server URL.
    pub server_address: String,
    /// Application name reported to the profiling server.
    pub application_name: String,
    /// Requested profile type names.
    pub profile_types: Vec<String>,
    /// Upload cadence requested for the agent.
    #[serde(with = "duration_ms")]
    pub upload_interval: Duration,
    /// Verbosity of the profiling client (`off` suppresses it).
    pub log_level: String,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            server_address: String::new(),
            application_name: String::new(),
            profile_types: vec!["cpu".to_string()],
            upload_interval: Duration::from_secs(15),
            log_level: "info".to_string(),
        }
    }
}

impl ProfilingConfig {
    /// Returns `true` when the profiling bridge should be started.
    ///
    /// An explicit flag wins over the implicit rule, but a target (address
    /// and application name) is always required.
    pub fn is_active(&self) -> bool {
        let has_target =
            !self.server_address.trim().is_empty() && !self.application_name.trim().is_empty();
        self.enabled.unwrap_or(has_target) && has_target
    }
}

/// Serde helper storing a [`Duration`] as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialises a duration as milliseconds.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    /// Deserialises milliseconds into a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
