//! Lifecycle span helpers.
//!
//! One span per orchestrated invocation, with phase transitions recorded
//! as events inside it.

use tracing::Span;

use crate::model::LifecycleAction;

/// Start a span for one worker's lifecycle action.
///
/// The `daemon.phase` field is declared empty and updated by
/// [`record_phase`].
pub fn start_action_span(group: &str, worker: &str, action: LifecycleAction) -> Span {
    tracing::info_span!(
        "daemon.action",
        "daemon.group" = group,
        "daemon.worker" = worker,
        "daemon.action" = action.as_str(),
        "daemon.phase" = tracing::field::Empty,
    )
}

/// Record a phase transition on the span.
pub fn record_phase(span: &Span, from: &str, to: &str) {
    span.record("daemon.phase", to);
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "phase_transition");
    });
}
