//! The `sample` group: two small workers used for smoke-testing a host.
//!
//! `Heartbeat` records a task on every step. `Counter` counts its steps and
//! records a task every `every` of them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::catalog::{WorkerGroup, WorkerType};
use crate::daemon::DaemonSettings;
use crate::error::Result;
use crate::test_runner::{TestCase, TestSuite};
use crate::worker::{Worker, WorkerContext, WorkerDefaults};

pub const GROUP: &str = "sample";

pub fn group() -> WorkerGroup {
    WorkerGroup::new(GROUP)
        .worker(WorkerType::new("Heartbeat", Heartbeat::boxed))
        .worker(WorkerType::new("Counter", Counter::boxed).defaults(WorkerDefaults {
            sleep_time: Duration::from_secs(2),
            ..WorkerDefaults::default()
        }))
        .tests(suite())
}

#[derive(Debug, Default)]
pub struct Heartbeat;

impl Heartbeat {
    fn boxed() -> Box<dyn Worker> {
        Box::new(Self)
    }

    pub fn describe(iteration: u64, at: chrono::DateTime<Utc>) -> String {
        format!("beat #{iteration} at {}", at.to_rfc3339())
    }
}

#[async_trait]
impl Worker for Heartbeat {
    async fn step(&mut self, ctx: &mut WorkerContext<'_>) -> Result<()> {
        let description = Self::describe(ctx.iteration(), Utc::now());
        tracing::debug!(%description, "heartbeat");
        ctx.log_task_completion("heartbeat", &description).await
    }
}

#[derive(Debug)]
pub struct Counter {
    every: u64,
    count: u64,
}

impl Default for Counter {
    fn default() -> Self {
        Self { every: 5, count: 0 }
    }
}

impl Counter {
    fn boxed() -> Box<dyn Worker> {
        Box::new(Self::default())
    }

    /// Advance the count, returning it when a report is due.
    pub fn tick(&mut self) -> Option<u64> {
        self.count += 1;
        (self.count % self.every == 0).then_some(self.count)
    }
}

#[async_trait]
impl Worker for Counter {
    fn configure(&mut self, settings: &DaemonSettings) {
        // Testing mode runs a single step, so report on it.
        if settings.testing {
            self.every = 1;
        }
    }

    async fn step(&mut self, ctx: &mut WorkerContext<'_>) -> Result<()> {
        if let Some(count) = self.tick() {
            ctx.log_task_completion("count", &format!("counted to {count}"))
                .await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Test suite: daemons.sample.tests
// ---------------------------------------------------------------------------

fn suite() -> TestSuite {
    TestSuite::new()
        .module(
            "test_heartbeat",
            vec![TestCase::new(
                "heartbeat_describes_iteration",
                heartbeat_describes_iteration,
            )],
        )
        .module(
            "test_counter",
            vec![
                TestCase::new("counter_reports_every_fifth", counter_reports_every_fifth),
                TestCase::new("counter_testing_reports_each", counter_testing_reports_each),
            ],
        )
        .module("helpers", vec![])
}

fn heartbeat_describes_iteration() -> anyhow::Result<()> {
    let at = Utc::now();
    let description = Heartbeat::describe(3, at);
    anyhow::ensure!(
        description.starts_with("beat #3 at "),
        "unexpected description: {description}"
    );
    Ok(())
}

fn counter_reports_every_fifth() -> anyhow::Result<()> {
    let mut counter = Counter::default();
    let reports: Vec<u64> = (0..12).filter_map(|_| counter.tick()).collect();
    anyhow::ensure!(reports == [5, 10], "reports were {reports:?}");
    Ok(())
}

fn counter_testing_reports_each() -> anyhow::Result<()> {
    let mut counter = Counter::default();
    let settings = DaemonSettings::for_worker(
        "Counter",
        crate::model::LifecycleAction::Start,
        WorkerDefaults::default(),
    );
    counter.configure(&DaemonSettings {
        testing: true,
        ..settings
    });
    anyhow::ensure!(counter.tick() == Some(1), "testing mode should report on the first step");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_runner::TestRunner;

    #[test]
    fn sample_suite_passes() {
        let mut catalog = crate::catalog::Catalog::new();
        catalog.register(group());
        let report = TestRunner::new(&catalog).run(GROUP, None).unwrap();
        assert_eq!(report.outcomes.len(), 3);
        assert!(report.success(), "{report}");
    }

    #[test]
    fn group_lists_both_workers() {
        assert_eq!(group().list_worker_types(), vec!["Counter", "Heartbeat"]);
    }
}
