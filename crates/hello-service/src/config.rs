//! Configuration loading.
//!
//! Layered with figment. Later sources override earlier ones:
//! 1. Default values (compiled in)
//! 2. A TOML file named by `HELLO_CONFIG_FILE` (optional)
//! 3. Environment variables
//!
//! Environment values go through the tolerant parsers in [`crate::env`]: a
//! malformed boolean, number or duration logs a warning and keeps the lower
//! layer's value. The enumerated HTTP modes are passed through verbatim, so an
//! unknown span-name or traces mode fails extraction.
//!
//! # Supported environment variables
//!
//! | Variable | Config path |
//! |----------|-------------|
//! | `HOST`, `PORT` | `server.host`, `server.port` |
//! | `DEPLOYMENT_ENV` | `server.deployment_env`, `telemetry.resource.deployment_environment` |
//! | `LOG_LEVEL` | `server.log_level` |
//! | `CACHE_IMPL`, `CACHE_SIZE` | `cache.implementation`, `cache.size` |
//! | `APP_HANDLER_SPANS_ENABLED` | `app.handler_spans_enabled` |
//! | `OTEL_SERVICE_NAME`, `SERVICE_VERSION`, `HOSTNAME` | `telemetry.resource.*` |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_EXPORTER_OTLP_INSECURE` | `telemetry.exporter.*` |
//! | `OTEL_TRACES_SAMPLER`, `OTEL_TRACES_SAMPLER_ARG` | `telemetry.traces.*` |
//! | `OTEL_METRICS_ENABLED`, `OTEL_METRIC_EXPORT_INTERVAL` | `telemetry.metrics.*` |
//! | `OTEL_RUNTIME_METRICS_ENABLED`, `OTEL_SCHEDULE_METRICS_ENABLED` | `telemetry.metrics.*` |
//! | `OTEL_LOGS_ENABLED` | `telemetry.logs.enabled` |
//! | `OTEL_HTTP_*` | `http.*` |
//! | `PYROSCOPE_*` | `telemetry.profiling.*` |

use crate::env::{parse_bool, parse_bool_loose, parse_duration, split_csv};
use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use hello_telemetry::{ResourceConfig, TelemetryConfig};
use hello_tower::HttpInstrumentationConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Names the optional TOML configuration file.
pub const CONFIG_FILE_ENV: &str = "HELLO_CONFIG_FILE";

const DEFAULT_DEPLOYMENT_ENV: &str = "dev";

/// Configuration could not be loaded.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer could not be read or a value failed to deserialise.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// The file named by `HELLO_CONFIG_FILE` does not exist.
    #[error("configuration file {} does not exist", .0.display())]
    MissingFile(PathBuf),
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener and process settings.
    pub server: ServerConfig,
    /// Cache collaborator settings.
    pub cache: CacheConfig,
    /// Handler-level instrumentation.
    pub app: AppConfig,
    /// Request instrumentation middleware.
    pub http: HttpInstrumentationConfig,
    /// Telemetry control plane.
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            app: AppConfig::default(),
            http: HttpInstrumentationConfig::default(),
            telemetry: TelemetryConfig {
                resource: ResourceConfig {
                    service_version: env!("CARGO_PKG_VERSION").to_string(),
                    deployment_environment: DEFAULT_DEPLOYMENT_ENV.to_string(),
                    ..ResourceConfig::default()
                },
                ..TelemetryConfig::default()
            },
        }
    }
}

impl Config {
    /// Loads configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if let Some(path) = std::env::var_os(CONFIG_FILE_ENV).filter(|p| !p.is_empty()) {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(ConfigError::MissingFile(path));
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Serialized::defaults(PartialConfig::from_env()));

        figment.extract().map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// `host:port` the server binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Listener and process settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks an ephemeral port.
    pub port: u16,
    /// Deployment environment name, reported at boot.
    pub deployment_env: String,
    /// Local log level (`debug`, `info`, `warn`, `error`).
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            deployment_env: DEFAULT_DEPLOYMENT_ENV.to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Cache collaborator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend name, see [`crate::cache::build`].
    pub implementation: String,
    /// Capacity; keys `1..=size` are prefilled.
    pub size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            implementation: "map".to_string(),
            size: 50_000,
        }
    }
}

/// Handler-level instrumentation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Open a nested `hello.virtual` span inside the handler.
    pub handler_spans_enabled: bool,
}

/// Environment overrides. Every field is optional so that unset variables
/// leave lower layers untouched.
#[derive(Debug, Default, Serialize)]
struct PartialConfig {
    server: PartialServer,
    cache: PartialCache,
    app: PartialApp,
    http: PartialHttp,
    telemetry: PartialTelemetry,
}

#[derive(Debug, Default, Serialize)]
struct PartialServer {
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deployment_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_level: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct PartialCache {
    #[serde(skip_serializing_if = "Option::is_none")]
    implementation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<usize>,
}

#[derive(Debug, Default, Serialize)]
struct PartialApp {
    #[serde(skip_serializing_if = "Option::is_none")]
    handler_spans_enabled: Option<bool>,
}

#[derive(Debug, Default, Serialize)]
struct PartialHttp {
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    traces_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    collect_client_ip: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ignore_paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span_name_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    propagation_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    traces_mode: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct PartialTelemetry {
    exporter: PartialExporter,
    resource: PartialResource,
    traces: PartialTraces,
    metrics: PartialMetrics,
    logs: PartialLogs,
    profiling: PartialProfiling,
}

#[derive(Debug, Default, Serialize)]
struct PartialExporter {
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    insecure: Option<bool>,
}

#[derive(Debug, Default, Serialize)]
struct PartialResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deployment_environment: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct PartialTraces {
    #[serde(skip_serializing_if = "Option::is_none")]
    sampler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sampler_arg: Option<f64>,
}

#[derive(Debug, Default, Serialize)]
struct PartialMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    /// Milliseconds, matching the `duration_ms` representation.
    #[serde(skip_serializing_if = "Option::is_none")]
    export_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    runtime_metrics: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedule_metrics: Option<bool>,
}

#[derive(Debug, Default, Serialize)]
struct PartialLogs {
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
}

#[derive(Debug, Default, Serialize)]
struct PartialProfiling {
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    application_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upload_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_level: Option<String>,
}

impl PartialConfig {
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let deployment_env = env.string("DEPLOYMENT_ENV");

        Self {
            server: PartialServer {
                host: env.string("HOST"),
                port: env.parsed("PORT"),
                deployment_env: deployment_env.clone(),
                log_level: env.string("LOG_LEVEL"),
            },
            cache: PartialCache {
                implementation: env.string("CACHE_IMPL"),
                size: env.parsed("CACHE_SIZE"),
            },
            app: PartialApp {
                handler_spans_enabled: env.bool("APP_HANDLER_SPANS_ENABLED"),
            },
            http: PartialHttp {
                enabled: env.bool("OTEL_HTTP_ENABLED"),
                traces_enabled: env.bool("OTEL_HTTP_TRACES_ENABLED"),
                metrics_enabled: env.bool("OTEL_HTTP_METRICS_ENABLED"),
                collect_client_ip: env.bool("OTEL_HTTP_COLLECT_CLIENT_IP"),
                ignore_paths: env.string("OTEL_HTTP_IGNORE_PATHS").map(|v| split_csv(&v)),
                span_name_mode: env.mode("OTEL_HTTP_SPAN_NAME_MODE"),
                propagation_enabled: env.bool("OTEL_HTTP_PROPAGATION_ENABLED"),
                traces_mode: env.mode("OTEL_HTTP_TRACES_MODE"),
            },
            telemetry: PartialTelemetry {
                exporter: PartialExporter {
                    endpoint: env.string("OTEL_EXPORTER_OTLP_ENDPOINT"),
                    insecure: env.bool("OTEL_EXPORTER_OTLP_INSECURE"),
                },
                resource: PartialResource {
                    service_name: env.string("OTEL_SERVICE_NAME"),
                    service_version: env.string("SERVICE_VERSION"),
                    instance_id: env.string("HOSTNAME"),
                    deployment_environment: deployment_env,
                },
                traces: PartialTraces {
                    sampler: env.mode("OTEL_TRACES_SAMPLER"),
                    sampler_arg: env.parsed("OTEL_TRACES_SAMPLER_ARG"),
                },
                metrics: PartialMetrics {
                    enabled: env.bool("OTEL_METRICS_ENABLED"),
                    export_interval: env.duration_ms(&[
                        "OTEL_METRIC_EXPORT_INTERVAL",
                        "OTEL_METRICS_EXPORT_INTERVAL",
                    ]),
                    runtime_metrics: env.bool("OTEL_RUNTIME_METRICS_ENABLED"),
                    schedule_metrics: env.bool("OTEL_SCHEDULE_METRICS_ENABLED"),
                },
                logs: PartialLogs {
                    enabled: env.bool("OTEL_LOGS_ENABLED"),
                },
                profiling: PartialProfiling {
                    enabled: env
                        .raw("PYROSCOPE_ENABLED")
                        .map(|v| parse_bool_loose(&v, false)),
                    server_address: env.string("PYROSCOPE_SERVER_ADDRESS"),
                    application_name: env.string("PYROSCOPE_APPLICATION_NAME"),
                    profile_types: env
                        .string("PYROSCOPE_PROFILE_TYPES")
                        .map(|v| split_csv(&v)),
                    upload_interval: env.duration_ms(&["PYROSCOPE_UPLOAD_INTERVAL"]),
                    log_level: env.mode("PYROSCOPE_LOG_LEVEL"),
                },
            },
        }
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    /// Trimmed value; empty counts as unset.
    fn string(&self, key: &str) -> Option<String> {
        self.raw(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Lowercased value for enumerated settings.
    fn mode(&self, key: &str) -> Option<String> {
        self.string(key).map(|v| v.to_ascii_lowercase())
    }

    fn bool(&self, key: &str) -> Option<bool> {
        let value = self.string(key)?;
        let parsed = parse_bool(&value);
        if parsed.is_none() {
            tracing::warn!(key, value = %value, "Ignoring malformed boolean");
        }
        parsed
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        let value = self.string(key)?;
        match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::warn!(key, value = %value, "Ignoring malformed number");
                None
            }
        }
    }

    /// First set key wins.
    fn duration_ms(&self, keys: &[&str]) -> Option<u64> {
        let (key, value) = keys
            .iter()
            .find_map(|key| self.string(key).map(|value| (*key, value)))?;
        match parse_duration(&value) {
            Ok(duration) => Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)),
            Err(e) => {
                tracing::warn!(key, value = %value, error = %e, "Ignoring malformed duration");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hello_tower::{HttpTracesMode, SpanNameMode};
    use serial_test::serial;
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;

    fn extract(vars: &[(&str, &str)]) -> Result<Config, figment::Error> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let partial = PartialConfig::from_lookup(|key| vars.get(key).cloned());

        Figment::from(Serialized::defaults(Config::default()))
            .merge(Serialized::defaults(partial))
            .extract()
    }

    #[test]
    fn test_defaults() {
        let config = extract(&[]).unwrap();

        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
        assert_eq!(config.server.deployment_env, "dev");
        assert_eq!(config.cache.implementation, "map");
        assert_eq!(config.cache.size, 50_000);
        assert!(!config.app.handler_spans_enabled);
        assert!(config.http.enabled);
        assert_eq!(config.http.span_name_mode, SpanNameMode::Constant);
        assert_eq!(config.http.traces_mode, HttpTracesMode::Full);
        assert!(config.telemetry.exporter.endpoint.is_empty());
        assert_eq!(config.telemetry.resource.service_name, "rust");
        assert_eq!(config.telemetry.resource.deployment_environment, "dev");
        assert_eq!(
            config.telemetry.metrics.export_interval,
            Duration::from_secs(15)
        );
        assert_eq!(config.telemetry.profiling.enabled, None);
    }

    #[test]
    fn test_environment_overrides() {
        let config = extract(&[
            ("PORT", "9090"),
            ("DEPLOYMENT_ENV", "bench"),
            ("CACHE_IMPL", "slice"),
            ("CACHE_SIZE", "10"),
            ("APP_HANDLER_SPANS_ENABLED", "true"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "collector:4317"),
            ("OTEL_EXPORTER_OTLP_INSECURE", "false"),
            ("OTEL_TRACES_SAMPLER", "TraceIdRatio"),
            ("OTEL_TRACES_SAMPLER_ARG", "0.25"),
            ("OTEL_METRICS_EXPORT_INTERVAL", "0.5*time.Second"),
            ("OTEL_HTTP_SPAN_NAME_MODE", "METHOD_ROUTE"),
            ("OTEL_HTTP_TRACES_MODE", "otelfiber"),
            ("OTEL_HTTP_IGNORE_PATHS", "/healthz, /metrics*"),
            ("HOSTNAME", "pod-1"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.deployment_env, "bench");
        assert_eq!(config.telemetry.resource.deployment_environment, "bench");
        assert_eq!(config.telemetry.resource.instance_id, "pod-1");
        assert_eq!(config.cache.implementation, "slice");
        assert_eq!(config.cache.size, 10);
        assert!(config.app.handler_spans_enabled);
        assert_eq!(config.telemetry.exporter.endpoint, "collector:4317");
        assert!(!config.telemetry.exporter.insecure);
        assert_eq!(config.telemetry.traces.sampler, "traceidratio");
        assert_eq!(config.telemetry.traces.sampler_arg, 0.25);
        assert_eq!(
            config.telemetry.metrics.export_interval,
            Duration::from_millis(500)
        );
        assert_eq!(config.http.span_name_mode, SpanNameMode::MethodRoute);
        assert_eq!(config.http.traces_mode, HttpTracesMode::Full);
        assert_eq!(config.http.ignore_paths, vec!["/healthz", "/metrics*"]);
    }

    #[test]
    fn test_malformed_values_keep_defaults() {
        let config = extract(&[
            ("PORT", "eighty"),
            ("CACHE_SIZE", "-3"),
            ("OTEL_METRICS_ENABLED", "sometimes"),
            ("OTEL_TRACES_SAMPLER_ARG", "half"),
            ("OTEL_METRIC_EXPORT_INTERVAL", "soon"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.cache.size, 50_000);
        assert!(config.telemetry.metrics.enabled);
        assert_eq!(config.telemetry.traces.sampler_arg, 1.0);
        assert_eq!(
            config.telemetry.metrics.export_interval,
            Duration::from_secs(15)
        );
    }

    #[test]
    fn test_singular_export_interval_wins() {
        let config = extract(&[
            ("OTEL_METRIC_EXPORT_INTERVAL", "5s"),
            ("OTEL_METRICS_EXPORT_INTERVAL", "7s"),
        ])
        .unwrap();

        assert_eq!(
            config.telemetry.metrics.export_interval,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_unknown_modes_fail_fast() {
        assert!(extract(&[("OTEL_HTTP_SPAN_NAME_MODE", "fancy")]).is_err());
        assert!(extract(&[("OTEL_HTTP_TRACES_MODE", "verbose")]).is_err());
    }

    #[test]
    fn test_unknown_sampler_is_not_fatal() {
        let config = extract(&[("OTEL_TRACES_SAMPLER", "sometimes")]).unwrap();
        assert_eq!(config.telemetry.traces.sampler, "sometimes");
    }

    #[test]
    fn test_profiling_switch() {
        let config = extract(&[
            ("PYROSCOPE_SERVER_ADDRESS", "http://pyroscope:4040"),
            ("PYROSCOPE_APPLICATION_NAME", "hello"),
        ])
        .unwrap();
        assert_eq!(config.telemetry.profiling.enabled, None);
        assert!(config.telemetry.profiling.is_active());

        let config = extract(&[
            ("PYROSCOPE_ENABLED", "false"),
            ("PYROSCOPE_SERVER_ADDRESS", "http://pyroscope:4040"),
            ("PYROSCOPE_APPLICATION_NAME", "hello"),
            ("PYROSCOPE_PROFILE_TYPES", "cpu,alloc"),
            ("PYROSCOPE_UPLOAD_INTERVAL", "10s"),
            ("PYROSCOPE_LOG_LEVEL", "OFF"),
        ])
        .unwrap();
        assert_eq!(config.telemetry.profiling.enabled, Some(false));
        assert!(!config.telemetry.profiling.is_active());
        assert_eq!(config.telemetry.profiling.profile_types, vec!["cpu", "alloc"]);
        assert_eq!(
            config.telemetry.profiling.upload_interval,
            Duration::from_secs(10)
        );
        assert_eq!(config.telemetry.profiling.log_level, "off");
    }

    #[test]
    #[serial]
    fn test_load_reads_toml_file_below_environment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 7070\nhost = \"127.0.0.1\"\n\n[cache]\nsize = 5\n"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        temp_env::with_vars(
            [
                (CONFIG_FILE_ENV, Some(path.as_str())),
                ("PORT", Some("6060")),
                ("CACHE_SIZE", None),
                ("HOST", None),
            ],
            || {
                let config = Config::load().unwrap();
                assert_eq!(config.server.host, "127.0.0.1");
                assert_eq!(config.server.port, 6060);
                assert_eq!(config.cache.size, 5);
            },
        );
    }

    #[test]
    #[serial]
    fn test_load_rejects_missing_file() {
        temp_env::with_var(CONFIG_FILE_ENV, Some("/nonexistent/hello.toml"), || {
            assert!(matches!(
                Config::load(),
                Err(ConfigError::MissingFile(_))
            ));
        });
    }
}
