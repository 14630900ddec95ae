//! Worker contract and lifecycle loop.
//!
//! A worker supplies one `step`. Everything around it (registering the
//! lifecycle action, sleeping between iterations, reacting to shutdown,
//! closing the registry connection) lives in [`run`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{Instrument, error, info};

use crate::daemon::{Daemon, DaemonSettings};
use crate::error::Result;
use crate::model::LifecycleAction;
use crate::store::{Connector, RegistryStore};

pub const DEFAULT_SLEEP_TIME: Duration = Duration::from_secs(10);
pub const DEFAULT_PID_TIMEOUT: Duration = Duration::from_secs(5);

/// A long-running unit of recurring work.
#[async_trait]
pub trait Worker: Send {
    /// Called once after construction with the resolved settings.
    fn configure(&mut self, _settings: &DaemonSettings) {}

    /// One iteration of work.
    async fn step(&mut self, ctx: &mut WorkerContext<'_>) -> Result<()>;
}

/// Per-type defaults used when the operator does not override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerDefaults {
    pub sleep_time: Duration,
    pub pid_timeout: Duration,
}

impl Default for WorkerDefaults {
    fn default() -> Self {
        Self {
            sleep_time: DEFAULT_SLEEP_TIME,
            pid_timeout: DEFAULT_PID_TIMEOUT,
        }
    }
}

/// Options supplied by the caller for one lifecycle action. `None` means
/// "use the worker's default".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    pub action: LifecycleAction,
    pub sleep_time: Option<Duration>,
    pub pid_timeout: Option<Duration>,
    pub testing: bool,
}

impl WorkerOptions {
    pub fn new(action: LifecycleAction) -> Self {
        Self {
            action,
            sleep_time: None,
            pid_timeout: None,
            testing: false,
        }
    }

    pub fn sleep_time(mut self, sleep_time: Duration) -> Self {
        self.sleep_time = Some(sleep_time);
        self
    }

    pub fn pid_timeout(mut self, pid_timeout: Duration) -> Self {
        self.pid_timeout = Some(pid_timeout);
        self
    }

    pub fn testing(mut self, testing: bool) -> Self {
        self.testing = testing;
        self
    }
}

/// What a running worker can see and do during a step.
pub struct WorkerContext<'a> {
    name: &'a str,
    settings: &'a DaemonSettings,
    store: &'a mut RegistryStore,
    iteration: u64,
}

impl WorkerContext<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn settings(&self) -> &DaemonSettings {
        self.settings
    }

    /// 1-based count of the step being executed.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn is_testing(&self) -> bool {
        self.settings.testing
    }

    /// Record a completed unit of work under this worker's name.
    pub async fn log_task_completion(&mut self, task_type: &str, description: &str) -> Result<()> {
        self.store.append_task(self.name, task_type, description).await
    }
}

/// Drive a constructed daemon until `shutdown` resolves.
///
/// Opens its own registry connection, records the daemon's lifecycle action,
/// then alternates `step` and sleep. In testing mode exactly one step runs.
/// A failing step ends the loop and its error is returned.
pub async fn run<F>(daemon: Daemon, connector: &dyn Connector, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let Daemon {
        name,
        settings,
        mut worker,
        ..
    } = daemon;
    let span = tracing::info_span!("worker.run", "worker.name" = %name);

    async move {
        let mut store = RegistryStore::open(connector).await?;
        let result = drive(&name, &settings, worker.as_mut(), &mut store, shutdown).await;
        store.close().await;
        if let Err(ref e) = result {
            error!(error = %e, "worker stopped on error");
        }
        result
    }
    .instrument(span)
    .await
}

async fn drive<F>(
    name: &str,
    settings: &DaemonSettings,
    worker: &mut dyn Worker,
    store: &mut RegistryStore,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    store.append_action(name, settings.action).await?;
    info!(action = %settings.action, sleep_secs = settings.sleep_time.as_secs(), "worker running");

    tokio::pin!(shutdown);
    let mut iteration = 0;
    loop {
        iteration += 1;
        let mut ctx = WorkerContext {
            name,
            settings,
            store: &mut *store,
            iteration,
        };
        worker.step(&mut ctx).await?;

        if settings.testing {
            info!(iteration, "testing mode, single iteration done");
            return Ok(());
        }

        tokio::select! {
            _ = &mut shutdown => {
                info!(iteration, "shutdown requested");
                return Ok(());
            }
            _ = tokio::time::sleep(settings.sleep_time) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::memory::MemoryConnector;

    struct Failing;

    #[async_trait]
    impl Worker for Failing {
        async fn step(&mut self, _ctx: &mut WorkerContext<'_>) -> Result<()> {
            Err(Error::Other("boom".into()))
        }
    }

    struct Logging;

    #[async_trait]
    impl Worker for Logging {
        async fn step(&mut self, ctx: &mut WorkerContext<'_>) -> Result<()> {
            let description = format!("iteration {}", ctx.iteration());
            ctx.log_task_completion("tick", &description).await
        }
    }

    fn daemon(worker: Box<dyn Worker>, action: LifecycleAction, testing: bool) -> Daemon {
        let mut settings = DaemonSettings::for_worker("Probe", action, WorkerDefaults::default());
        settings.testing = testing;
        settings.sleep_time = Duration::from_millis(5);
        Daemon {
            group: "sample".into(),
            name: "Probe".into(),
            settings,
            worker,
        }
    }

    #[tokio::test]
    async fn run_requires_registration() {
        let connector = MemoryConnector::new();
        let err = run(
            daemon(Box::new(Logging), LifecycleAction::Start, true),
            &connector,
            std::future::pending(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::NotRegistered(ref n) if n == "Probe"));
        assert!(connector.tasks().is_empty());
    }

    #[tokio::test]
    async fn testing_mode_runs_one_step_and_logs_own_action() {
        let connector = MemoryConnector::new();
        connector.seed_worker("Probe");

        run(
            daemon(Box::new(Logging), LifecycleAction::Restart, true),
            &connector,
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(connector.actions_for("Probe"), vec![LifecycleAction::Restart]);
        let tasks = connector.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].description, "iteration 1");
    }

    #[tokio::test]
    async fn loop_ends_on_shutdown() {
        let connector = MemoryConnector::new();
        connector.seed_worker("Probe");

        run(
            daemon(Box::new(Logging), LifecycleAction::Start, false),
            &connector,
            tokio::time::sleep(Duration::from_millis(30)),
        )
        .await
        .unwrap();

        assert!(!connector.tasks().is_empty());
    }

    #[tokio::test]
    async fn step_error_ends_the_loop() {
        let connector = MemoryConnector::new();
        connector.seed_worker("Probe");

        let err = run(
            daemon(Box::new(Failing), LifecycleAction::Start, false),
            &connector,
            std::future::pending(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Other(ref m) if m == "boom"));
        assert_eq!(connector.actions_for("Probe"), vec![LifecycleAction::Start]);
    }
}
