//! Metric instrument factories for daemonizer.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"daemonizer"` meter.

use opentelemetry::metrics::{Counter, Meter};

/// Returns the shared meter for daemonizer instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("daemonizer")
}

/// Counter: lifecycle actions written to the action log.
/// Labels: `worker`, `action`.
pub fn actions() -> Counter<u64> {
    meter()
        .u64_counter("daemonizer.actions")
        .with_description("Lifecycle actions recorded in the registry")
        .build()
}

/// Counter: tasks reported complete by running workers.
/// Labels: `worker`, `task_type`.
pub fn tasks_completed() -> Counter<u64> {
    meter()
        .u64_counter("daemonizer.tasks.completed")
        .with_description("Tasks recorded in the registry")
        .build()
}

/// Counter: workers newly inserted into the registry.
/// Labels: `worker`.
pub fn workers_registered() -> Counter<u64> {
    meter()
        .u64_counter("daemonizer.workers.registered")
        .with_description("Workers added to the registry")
        .build()
}

/// Counter: orchestrated actions that ended in the failure report.
/// Labels: `worker`, `action`.
pub fn orchestration_failures() -> Counter<u64> {
    meter()
        .u64_counter("daemonizer.orchestration.failures")
        .with_description("Lifecycle actions that failed for a worker")
        .build()
}

/// Counter: reconnects after a dropped registry connection.
pub fn store_reconnects() -> Counter<u64> {
    meter()
        .u64_counter("daemonizer.store.reconnects")
        .with_description("Registry store reconnect attempts")
        .build()
}
