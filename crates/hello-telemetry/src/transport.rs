//! The single outbound OTLP channel shared by every signal exporter.

use crate::config::ExporterConfig;
use crate::error::TelemetryError;
use http::Uri;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

/// A lazily connected gRPC channel to the collector.
///
/// Cloning a [`Channel`] is cheap and every clone multiplexes over the same
/// underlying HTTP/2 connection, so the trace, metric and log exporters all
/// receive clones of this one channel.
#[derive(Debug, Clone)]
pub struct Transport {
    channel: Channel,
    target: String,
    insecure: bool,
}

impl Transport {
    /// Opens the channel described by `config`.
    ///
    /// The connection itself is established on first use, so an unreachable
    /// collector does not fail setup; a malformed endpoint or TLS
    /// configuration does.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(config: &ExporterConfig) -> Result<Self, TelemetryError> {
        let target = dial_target(&config.endpoint)?;
        let scheme = if config.insecure { "http" } else { "https" };

        let mut endpoint = Endpoint::from_shared(format!("{scheme}://{target}")).map_err(|e| {
            TelemetryError::InvalidEndpoint {
                endpoint: config.endpoint.clone(),
                reason: e.to_string(),
            }
        })?;

        if !config.insecure {
            endpoint = endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?;
        }

        Ok(Self {
            channel: endpoint.connect_lazy(),
            target,
            insecure: config.insecure,
        })
    }

    /// Returns a handle to the shared channel.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// The `host:port` the channel dials.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether the channel is plaintext.
    pub fn is_insecure(&self) -> bool {
        self.insecure
    }
}

/// Derives the dial target from an endpoint value.
///
/// Values containing `://` are parsed as URLs and must carry a host; the
/// target is the URL authority. Anything else is taken verbatim as
/// `host:port`.
pub fn dial_target(endpoint: &str) -> Result<String, TelemetryError> {
    let endpoint = endpoint.trim();
    let invalid = |reason: &str| TelemetryError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    if endpoint.is_empty() {
        return Err(invalid("endpoint is empty"));
    }

    if !endpoint.contains("://") {
        return Ok(endpoint.to_string());
    }

    let uri: Uri = endpoint.parse().map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;

    match (uri.host(), uri.authority()) {
        (Some(host), Some(authority)) if !host.is_empty() => Ok(authority.to_string()),
        _ => Err(invalid("URL has no host")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_port_is_used_verbatim() {
        assert_eq!(dial_target("otel-collector:4317").unwrap(), "otel-collector:4317");
        assert_eq!(dial_target(" localhost:4317 ").unwrap(), "localhost:4317");
    }

    #[test]
    fn test_url_yields_authority() {
        assert_eq!(
            dial_target("http://otel-collector:4317").unwrap(),
            "otel-collector:4317"
        );
        assert_eq!(
            dial_target("https://collector.example.com:443/v1/traces").unwrap(),
            "collector.example.com:443"
        );
        assert_eq!(dial_target("http://collector").unwrap(), "collector");
    }

    #[test]
    fn test_url_without_host_is_rejected() {
        let err = dial_target("http://").unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidEndpoint { .. }));

        assert!(dial_target("http:///v1/traces").is_err());
    }

    #[test]
    fn test_empty_endpoint_is_rejected() {
        assert!(dial_target("").is_err());
        assert!(dial_target("   ").is_err());
    }

    #[tokio::test]
    async fn test_connect_is_lazy() {
        let config = ExporterConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            insecure: true,
        };

        let transport = Transport::connect(&config).expect("lazy connect never dials");
        assert_eq!(transport.target(), "127.0.0.1:1");
        assert!(transport.is_insecure());
    }

    #[tokio::test]
    async fn test_malformed_target_fails_setup() {
        let config = ExporterConfig {
            endpoint: "not a host:4317".to_string(),
            insecure: true,
        };

        let err = Transport::connect(&config).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidEndpoint { .. }));
    }
}
