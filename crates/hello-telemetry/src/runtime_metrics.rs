//! Tokio runtime introspection gauges.
//!
//! The gauges are observed on every metric export cycle, so their cost is
//! bounded by the export cadence rather than by request volume.

use opentelemetry::metrics::Meter;
use tokio::runtime::Handle;

/// Registers the runtime gauges on `meter`.
///
/// `runtime` enables worker and alive-task gauges; `schedule` enables the
/// global queue depth gauge. Without a current tokio runtime nothing is
/// registered and a warning is logged.
pub fn register(meter: &Meter, runtime: bool, schedule: bool) {
    if !runtime && !schedule {
        return;
    }

    let Ok(handle) = Handle::try_current() else {
        tracing::warn!(
            target: "otel_lifecycle",
            "No tokio runtime available; runtime metrics disabled"
        );
        return;
    };

    if runtime {
        let workers = handle.clone();
        meter
            .u64_observable_gauge("tokio.runtime.workers")
            .with_description("Number of worker threads used by the runtime")
            .with_callback(move |observer| {
                observer.observe(workers.metrics().num_workers() as u64, &[]);
            })
            .build();

        let tasks = handle.clone();
        meter
            .u64_observable_gauge("tokio.runtime.alive_tasks")
            .with_description("Number of tasks currently alive in the runtime")
            .with_callback(move |observer| {
                observer.observe(tasks.metrics().num_alive_tasks() as u64, &[]);
            })
            .build();
    }

    if schedule {
        meter
            .u64_observable_gauge("tokio.runtime.global_queue_depth")
            .with_description("Number of tasks waiting in the runtime's global queue")
            .with_callback(move |observer| {
                observer.observe(handle.metrics().global_queue_depth() as u64, &[]);
            })
            .build();
    }
}
