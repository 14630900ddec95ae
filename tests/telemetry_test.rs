//! Integration tests for telemetry initialization and span helpers.

use daemonizer::model::LifecycleAction;

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    let config = daemonizer::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "daemonizer-test".to_string(),
        worker: Some("Heartbeat".to_string()),
        default_filter: "debug".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = daemonizer::telemetry::init_telemetry(config);
}

#[test]
fn scoped_logging_is_released_with_its_guard() {
    let guard = daemonizer::telemetry::scoped_logging("debug");
    tracing::info!("logged through the scoped subscriber");
    drop(guard);
    tracing::info!("dropped without a thread-local subscriber");
}

#[test]
fn action_span_creates_and_records_phases() {
    let span =
        daemonizer::telemetry::lifecycle::start_action_span("sample", "Heartbeat", LifecycleAction::Stop);
    daemonizer::telemetry::lifecycle::record_phase(&span, "idle", "resolving");
    daemonizer::telemetry::lifecycle::record_phase(&span, "running", "stopped");
}

#[test]
fn metric_instruments_build_without_provider() {
    use opentelemetry::KeyValue;

    daemonizer::telemetry::metrics::actions()
        .add(1, &[KeyValue::new("action", "start")]);
    daemonizer::telemetry::metrics::tasks_completed().add(1, &[]);
    daemonizer::telemetry::metrics::orchestration_failures().add(1, &[]);
}
