//! Daemon orchestrator: one lifecycle action per named worker.
//!
//! Each invocation moves through
//! `Idle → Resolving → Constructed → Running → (Stopped | Failed)`.
//! A failure is captured against the worker's name and the batch moves on;
//! it never aborts the remaining invocations.

use opentelemetry::KeyValue;
use tracing::{Instrument, Span, warn};

use crate::catalog::Catalog;
use crate::daemon::DaemonRunner;
use crate::error::{Error, Result};
use crate::model::LifecycleAction;
use crate::store::{Connector, RegistryStore};
use crate::telemetry::lifecycle::{record_phase, start_action_span};
use crate::telemetry::metrics;
use crate::worker::WorkerOptions;

/// Where an invocation currently is. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Resolving,
    Constructed,
    Running,
    Stopped,
    Failed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Resolving => "resolving",
            Phase::Constructed => "constructed",
            Phase::Running => "running",
            Phase::Stopped => "stopped",
            Phase::Failed => "failed",
        }
    }
}

/// One requested action on one worker.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub group: String,
    pub worker: String,
    pub options: WorkerOptions,
}

impl Invocation {
    pub fn new(group: impl Into<String>, worker: impl Into<String>, options: WorkerOptions) -> Self {
        Self {
            group: group.into(),
            worker: worker.into(),
            options,
        }
    }
}

/// Failures collected over a batch, in invocation order.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub failures: Vec<(String, Error)>,
}

impl ExecutionReport {
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, worker: &str) -> bool {
        self.failures.iter().any(|(name, _)| name == worker)
    }
}

impl std::fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "All Actions Done Successfully!");
        }
        for (worker, error) in &self.failures {
            writeln!(f, "\"{worker}\" process failed due to following error:\n{error}")?;
        }
        Ok(())
    }
}

pub struct Orchestrator<'a> {
    catalog: &'a Catalog,
    runner: &'a dyn DaemonRunner,
    connector: &'a dyn Connector,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        catalog: &'a Catalog,
        runner: &'a dyn DaemonRunner,
        connector: &'a dyn Connector,
    ) -> Self {
        Self {
            catalog,
            runner,
            connector,
        }
    }

    /// Run every invocation in order and report the ones that failed.
    pub async fn execute(&self, invocations: &[Invocation]) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for invocation in invocations {
            let span = start_action_span(
                &invocation.group,
                &invocation.worker,
                invocation.options.action,
            );
            let result = self
                .execute_one(invocation, &span)
                .instrument(span.clone())
                .await;

            if let Err(error) = result {
                span.in_scope(|| warn!(error = %error, "lifecycle action failed"));
                metrics::orchestration_failures().add(
                    1,
                    &[
                        KeyValue::new("worker", invocation.worker.clone()),
                        KeyValue::new("action", invocation.options.action.as_str()),
                    ],
                );
                report.failures.push((invocation.worker.clone(), error));
            }
        }
        report
    }

    async fn execute_one(&self, invocation: &Invocation, span: &Span) -> Result<()> {
        let mut phase = PhaseTracker::new(span);
        let result = self.drive(invocation, &mut phase).await;
        if result.is_err() {
            phase.advance(Phase::Failed);
        }
        result
    }

    async fn drive(&self, invocation: &Invocation, phase: &mut PhaseTracker<'_>) -> Result<()> {
        phase.advance(Phase::Resolving);
        let worker_type = self
            .catalog
            .resolve_group(&invocation.group)?
            .resolve_worker_type(&invocation.worker)?;

        let daemon = worker_type.construct(&invocation.group, &invocation.options);
        let name = daemon.name.clone();
        phase.advance(Phase::Constructed);

        phase.advance(Phase::Running);
        self.runner.perform_action(daemon).await?;

        if invocation.options.action == LifecycleAction::Stop {
            // The stopped daemon took its own connection down with it.
            let mut store = RegistryStore::open(self.connector).await?;
            let logged = store.append_action(&name, LifecycleAction::Stop).await;
            store.close().await;
            logged?;
            phase.advance(Phase::Stopped);
        }
        Ok(())
    }
}

struct PhaseTracker<'s> {
    span: &'s Span,
    phase: Phase,
}

impl<'s> PhaseTracker<'s> {
    fn new(span: &'s Span) -> Self {
        Self {
            span,
            phase: Phase::Idle,
        }
    }

    fn advance(&mut self, to: Phase) {
        record_phase(self.span, self.phase.as_str(), to.as_str());
        self.phase = to;
    }
}
