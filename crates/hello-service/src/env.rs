//! Tolerant parsing of environment-style configuration values.
//!
//! Everything here degrades instead of failing: callers pick a default when a
//! value is empty or malformed. Only [`parse_duration`] reports an error, so
//! the caller can log what was rejected.

use std::time::Duration;
use thiserror::Error;

/// A duration value that could not be parsed.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    /// The value was empty or whitespace.
    #[error("empty duration")]
    Empty,

    /// The legacy `<float>*time.<Unit>` form named an unknown unit.
    #[error("unknown time unit {0:?}")]
    UnknownUnit(String),

    /// The value matched none of the accepted notations.
    #[error("unsupported duration format {0:?}")]
    Invalid(String),
}

/// Parses a duration.
///
/// Accepted notations, tried in order:
///
/// 1. a duration literal such as `15s`, `150ms`, `1m30s` or `1.5h`
/// 2. a bare integer, interpreted as milliseconds
/// 3. the legacy `<float>*time.<Unit>` form, e.g. `0.5*time.Second`
///
/// Negative durations are rejected.
pub fn parse_duration(value: &str) -> Result<Duration, DurationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DurationError::Empty);
    }

    if let Some(duration) = parse_literal(value) {
        return Ok(duration);
    }

    if let Ok(ms) = value.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }

    if let Some((factor, unit)) = value.split_once('*') {
        let factor: f64 = factor
            .trim()
            .parse()
            .map_err(|_| DurationError::Invalid(value.to_string()))?;
        let unit = unit.trim();
        let unit = unit.strip_prefix("time.").unwrap_or(unit);
        let nanos_per_unit = match unit {
            "Nanosecond" => 1.0,
            "Microsecond" => 1e3,
            "Millisecond" => 1e6,
            "Second" => 1e9,
            "Minute" => 60e9,
            "Hour" => 3600e9,
            other => return Err(DurationError::UnknownUnit(other.to_string())),
        };
        return from_nanos_f64(factor * nanos_per_unit)
            .ok_or_else(|| DurationError::Invalid(value.to_string()));
    }

    Err(DurationError::Invalid(value.to_string()))
}

/// Duration literal: an optional `+`, then one or more `<decimal><unit>`
/// terms. A lone `0` is accepted.
fn parse_literal(value: &str) -> Option<Duration> {
    let rest = value.strip_prefix('+').unwrap_or(value);
    if rest == "0" {
        return Some(Duration::ZERO);
    }
    if rest.is_empty() {
        return None;
    }

    let mut total = 0f64;
    let mut rest = rest;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return None;
        }
        let number: f64 = number.parse().ok()?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let nanos_per_unit = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };

        total += number * nanos_per_unit;
        rest = tail;
    }

    from_nanos_f64(total)
}

fn from_nanos_f64(nanos: f64) -> Option<Duration> {
    if !nanos.is_finite() || nanos < 0.0 || nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos.round() as u64))
}

/// Parses a boolean. Accepts `1/t/true/yes/on` and `0/f/false/no/off` in any
/// case.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses a boolean, returning `default` for empty or unrecognised input.
pub fn parse_bool_loose(value: &str, default: bool) -> bool {
    parse_bool(value).unwrap_or(default)
}

/// Splits a comma-separated list, trimming entries and dropping empty ones.
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
