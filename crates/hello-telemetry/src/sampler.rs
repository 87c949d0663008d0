//! Sampling policy selection.

use opentelemetry_sdk::trace::Sampler;
use std::fmt;
use std::str::FromStr;

/// Named sampling modes, following the `OTEL_TRACES_SAMPLER` vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SamplerMode {
    /// Follow the parent decision; sample root spans.
    #[default]
    ParentBasedAlwaysOn,
    /// Follow the parent decision; drop root spans.
    ParentBasedAlwaysOff,
    /// Sample everything.
    AlwaysOn,
    /// Sample nothing.
    AlwaysOff,
    /// Sample by trace id with a fixed probability.
    TraceIdRatio,
    /// Follow the parent decision; sample root spans by trace id ratio.
    ParentBasedTraceIdRatio,
}

impl SamplerMode {
    /// Canonical name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParentBasedAlwaysOn => "parentbased_always_on",
            Self::ParentBasedAlwaysOff => "parentbased_always_off",
            Self::AlwaysOn => "always_on",
            Self::AlwaysOff => "always_off",
            Self::TraceIdRatio => "traceidratio",
            Self::ParentBasedTraceIdRatio => "parentbased_traceidratio",
        }
    }

    /// Builds the SDK sampler for this mode. `ratio` is only used by the
    /// ratio-based modes and is clamped to `[0, 1]`.
    pub fn sampler(self, ratio: f64) -> Sampler {
        match self {
            Self::ParentBasedAlwaysOn => Sampler::ParentBased(Box::new(Sampler::AlwaysOn)),
            Self::ParentBasedAlwaysOff => Sampler::ParentBased(Box::new(Sampler::AlwaysOff)),
            Self::AlwaysOn => Sampler::AlwaysOn,
            Self::AlwaysOff => Sampler::AlwaysOff,
            Self::TraceIdRatio => Sampler::TraceIdRatioBased(clamp01(ratio)),
            Self::ParentBasedTraceIdRatio => Sampler::ParentBased(Box::new(
                Sampler::TraceIdRatioBased(clamp01(ratio)),
            )),
        }
    }
}

impl fmt::Display for SamplerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a sampler mode name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSamplerMode(pub String);

impl fmt::Display for UnknownSamplerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown sampler mode {:?}", self.0)
    }
}

impl std::error::Error for UnknownSamplerMode {}

impl FromStr for SamplerMode {
    type Err = UnknownSamplerMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "parentbased_always_on" => Ok(Self::ParentBasedAlwaysOn),
            "parentbased_always_off" => Ok(Self::ParentBasedAlwaysOff),
            "always_on" => Ok(Self::AlwaysOn),
            "always_off" => Ok(Self::AlwaysOff),
            "traceidratio" => Ok(Self::TraceIdRatio),
            "parentbased_traceidratio" => Ok(Self::ParentBasedTraceIdRatio),
            _ => Err(UnknownSamplerMode(s.to_string())),
        }
    }
}

/// Selects the sampler for a mode name and ratio.
///
/// Total over all inputs: an unrecognised name falls back to
/// `parentbased_always_on` so a typo never silently disables tracing.
pub fn select_sampler(mode: &str, ratio: f64) -> Sampler {
    let mode = mode.parse::<SamplerMode>().unwrap_or_else(|e| {
        tracing::warn!(
            target: "otel_lifecycle",
            error = %e,
            fallback = SamplerMode::default().as_str(),
            "Unrecognised sampler mode"
        );
        SamplerMode::default()
    });
    mode.sampler(ratio)
}

/// Clamps a ratio to `[0, 1]`. `NaN` maps to `0`.
pub fn clamp01(ratio: f64) -> f64 {
    if ratio.is_nan() {
        return 0.0;
    }
    ratio.clamp(0.0, 1.0)
}
