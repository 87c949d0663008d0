//! Workspace-level integration tests for the `hello` benchmark service.
//!
//! This package has no code of its own. The tests under `tests/` start the
//! real router on an ephemeral port and talk to it over HTTP. The
//! functionality lives in the member crates:
//!
//! - `hello-telemetry`: telemetry control plane (transport, pipelines,
//!   profiling bridge, shutdown chain)
//! - `hello-tower`: request instrumentation middleware
//! - `hello-service`: configuration, cache, handlers and the `hello` binary
