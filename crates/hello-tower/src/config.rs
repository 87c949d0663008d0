//! HTTP instrumentation settings.

use crate::span_name::SpanNameMode;
use serde::{Deserialize, Serialize};

/// How much detail server spans carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpTracesMode {
    /// Spans with HTTP semantic-convention attributes.
    #[default]
    #[serde(alias = "otelfiber")]
    Full,
    /// Spans with only name, kind and status.
    Minimal,
}

impl HttpTracesMode {
    /// Canonical name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Minimal => "minimal",
        }
    }
}

/// Request instrumentation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpInstrumentationConfig {
    /// Install the middleware at all.
    pub enabled: bool,
    /// Create server spans.
    pub traces_enabled: bool,
    /// Record the request duration histogram.
    pub metrics_enabled: bool,
    /// Add `client.address` to full-mode spans.
    pub collect_client_ip: bool,
    /// Paths (or `"/prefix*"` globs) that skip instrumentation.
    pub ignore_paths: Vec<String>,
    /// Span naming policy.
    pub span_name_mode: SpanNameMode,
    /// Extract W3C trace context from incoming headers.
    pub propagation_enabled: bool,
    /// Attribute detail level.
    pub traces_mode: HttpTracesMode,
}

impl Default for HttpInstrumentationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            traces_enabled: true,
            metrics_enabled: false,
            collect_client_ip: false,
            ignore_paths: vec![
                "/healthz".to_string(),
                "/readyz".to_string(),
                "/livez".to_string(),
            ],
            span_name_mode: SpanNameMode::Constant,
            propagation_enabled: true,
            traces_mode: HttpTracesMode::Full,
        }
    }
}
