//! daemonizer CLI: operator interface to worker daemons.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use daemonizer::catalog::Catalog;
use daemonizer::config::{Config, LogConfig};
use daemonizer::daemon::{Daemon, Detached, Mode, PidfileRunner, detach, shutdown_signal};
use daemonizer::model::{Action, LifecycleAction};
use daemonizer::orchestrator::{Invocation, Orchestrator};
use daemonizer::registrar::Registrar;
use daemonizer::store::Connector;
use daemonizer::store::postgres::PgConnector;
use daemonizer::telemetry::{TelemetryConfig, init_telemetry, scoped_logging};
use daemonizer::test_runner::TestRunner;
use daemonizer::worker::{self, WorkerOptions};
use tracing::info;

#[derive(Parser)]
#[command(name = "daemonizer", about = "Start, stop and track worker daemons")]
struct Cli {
    /// One of: start, stop, restart, register, test
    action: String,
    /// Worker group, e.g. `sample` or `daemons.sample`
    group: Option<String>,
    /// Worker names; for `test`, an optional single test case name
    workers: Vec<String>,
    /// Seconds to sleep between worker steps
    #[arg(long)]
    sleep_time: Option<u64>,
    /// Seconds to wait on the pidfile when starting or stopping
    #[arg(long)]
    pid_timeout: Option<u64>,
    /// Run one iteration in the foreground without a pidfile
    #[arg(long)]
    testing: bool,
    /// Run in this process instead of detaching
    #[arg(long)]
    foreground: bool,
    /// Apply registry schema migrations first
    #[arg(long)]
    migrate: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let action: Action = cli.action.parse()?;
    let log = LogConfig::from_env();

    match action.lifecycle() {
        Some(lifecycle) if detaches(lifecycle, &cli) => cmd_detach(lifecycle, &cli, &log),
        _ => runtime()?.block_on(operate(action, &cli, &log)),
    }
}

/// Starts and restarts detach unless asked to stay in this process.
fn detaches(action: LifecycleAction, cli: &Cli) -> bool {
    action != LifecycleAction::Stop && !cli.foreground && !cli.testing
}

fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

fn telemetry(log: &LogConfig, worker: Option<String>) -> TelemetryConfig {
    TelemetryConfig {
        endpoint: log.otel_endpoint.clone(),
        service_name: "daemonizer".to_string(),
        worker,
        default_filter: log.log_level.clone(),
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Everything that runs to completion in this process.
async fn operate(action: Action, cli: &Cli, log: &LogConfig) -> anyhow::Result<ExitCode> {
    let worker = if cli.foreground && action.lifecycle().is_some() {
        cli.workers.first().cloned()
    } else {
        None
    };
    let _guard = init_telemetry(telemetry(log, worker))?;

    let catalog = Catalog::builtin();

    match action {
        Action::Test => cmd_test(&catalog, cli),
        Action::Register => {
            let config = Config::from_env()?;
            let connector = connect(&config, cli.migrate).await?;
            cmd_register(&catalog, connector.as_ref(), &config, cli).await
        }
        Action::Start | Action::Stop | Action::Restart => {
            let lifecycle = action
                .lifecycle()
                .context("lifecycle action without lifecycle mapping")?;
            let config = Config::from_env()?;
            let connector = connect(&config, cli.migrate).await?;
            let invocations = invocations(lifecycle, cli)?;
            let runner = PidfileRunner::new(Arc::clone(&connector), Mode::Foreground);
            let report = Orchestrator::new(&catalog, &runner, connector.as_ref())
                .execute(&invocations)
                .await;
            println!("{report}");
            Ok(exit_code(report.success()))
        }
    }
}

async fn connect(config: &Config, migrate: bool) -> anyhow::Result<Arc<dyn Connector>> {
    let connector = PgConnector::new(&config.store);
    if migrate {
        connector.migrate().await?;
    }
    Ok(Arc::new(connector))
}

fn cmd_test(catalog: &Catalog, cli: &Cli) -> anyhow::Result<ExitCode> {
    let group = cli
        .group
        .as_deref()
        .context("a worker group is required for `test`")?;
    if cli.workers.len() > 1 {
        anyhow::bail!("`test` accepts at most one test case name");
    }

    let report = TestRunner::new(catalog).run(group, cli.workers.first().map(String::as_str))?;
    println!("{report}");
    Ok(if report.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_register(
    catalog: &Catalog,
    connector: &dyn Connector,
    config: &Config,
    cli: &Cli,
) -> anyhow::Result<ExitCode> {
    let registrar = Registrar::new(catalog, connector, config.installed_groups.as_deref());
    let registration = registrar
        .execute(cli.group.as_deref(), &cli.workers)
        .await?;
    println!("{registration}");
    Ok(ExitCode::SUCCESS)
}

fn invocations(action: LifecycleAction, cli: &Cli) -> anyhow::Result<Vec<Invocation>> {
    let group = cli
        .group
        .as_deref()
        .with_context(|| format!("a worker group is required for `{action}`"))?;
    if cli.workers.is_empty() {
        anyhow::bail!("at least one worker name is required for `{action}`");
    }
    if cli.foreground && cli.workers.len() > 1 {
        anyhow::bail!("--foreground runs exactly one worker");
    }

    let mut options = WorkerOptions::new(action).testing(cli.testing);
    if let Some(secs) = cli.sleep_time {
        options = options.sleep_time(Duration::from_secs(secs));
    }
    if let Some(secs) = cli.pid_timeout {
        options = options.pid_timeout(Duration::from_secs(secs));
    }
    Ok(cli
        .workers
        .iter()
        .map(|worker| Invocation::new(group, worker, options))
        .collect())
}

/// Start or restart detached daemons.
///
/// Checks, stops and registry lookups run on a runtime that is dropped
/// before the first fork. Each forked daemon then builds its own runtime
/// and telemetry.
fn cmd_detach(action: LifecycleAction, cli: &Cli, log: &LogConfig) -> anyhow::Result<ExitCode> {
    let config = Config::from_env()?;
    let invocations = invocations(action, cli)?;
    let catalog = Catalog::builtin();

    let (report, connector, launched) = {
        let _log = scoped_logging(&log.log_level);
        let (mut report, connector, launches) = runtime()?.block_on(async {
            let connector = connect(&config, cli.migrate).await?;
            let runner = PidfileRunner::new(Arc::clone(&connector), Mode::Detach);
            let report = Orchestrator::new(&catalog, &runner, connector.as_ref())
                .execute(&invocations)
                .await;
            anyhow::Ok((report, connector, runner.take_launches()))
        })?;

        let mut launched = None;
        for daemon in launches {
            match detach(&daemon.settings) {
                Ok(Detached::Parent) => info!(worker = %daemon.name, "daemon detached"),
                Ok(Detached::Daemon(setup)) => {
                    launched = Some((daemon, setup));
                    break;
                }
                Err(e) => report.failures.push((daemon.name.clone(), e)),
            }
        }
        (report, connector, launched)
    };

    if let Some((daemon, setup)) = launched {
        return Ok(serve(daemon, connector, setup, log));
    }
    println!("{report}");
    Ok(exit_code(report.success()))
}

/// Body of a detached daemon, after the fork.
fn serve(
    daemon: Daemon,
    connector: Arc<dyn Connector>,
    setup: daemonizer::error::Result<()>,
    log: &LogConfig,
) -> ExitCode {
    let result = setup.map_err(anyhow::Error::from).and_then(|()| {
        runtime()?.block_on(async move {
            let _guard = init_telemetry(telemetry(log, Some(daemon.name.clone())))?;
            info!(worker = %daemon.name, pid = std::process::id(), "daemon started");
            worker::run(daemon, connector.as_ref(), shutdown_signal()?).await?;
            anyhow::Ok(())
        })
    });
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
