//! HTTP benchmarking service built on the `hello-telemetry` control plane.
//!
//! The service answers `GET /hello/virtual` from a prefilled in-memory cache
//! and exposes health probes. Everything observable about it (spans, request
//! metrics, logs, profiles) is switched on or off through configuration:
//!
//! - [`config`] layers defaults, an optional TOML file and environment
//!   variables into a [`Config`]
//! - [`diagnostics`] reports runtime and container limits once at boot
//! - [`app`] assembles the router and attaches the request middleware
//! - [`server`] runs the listener until a termination signal arrives
//!
//! The `hello` binary wires these together.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod env;
pub mod handlers;
pub mod server;

pub use cache::{Cache, CacheError, CacheHandle};
pub use config::{Config, ConfigError};
pub use diagnostics::{BootReport, ProbeRoots};
pub use handlers::{HelloError, HelloState, RequestCounter};
