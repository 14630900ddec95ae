//! Daemonization seam.
//!
//! The orchestrator hands a constructed [`Daemon`] to a [`DaemonRunner`],
//! which performs the OS-level start/stop/restart mechanics. The shipped
//! runner is [`pidfile::PidfileRunner`]; [`detach::detach`] forks the
//! daemons it queues.

pub mod detach;
pub mod pidfile;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::LifecycleAction;
use crate::worker::{Worker, WorkerDefaults};

pub use detach::{Detached, detach};
pub use pidfile::{Mode, Pidfile, PidfileRunner, shutdown_signal};

/// Everything the runner needs to know about how a daemon runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSettings {
    pub action: LifecycleAction,
    pub sleep_time: Duration,
    /// How long to wait on the pidfile: for a previous holder to exit on
    /// start, or for the signalled process to die on stop.
    pub pid_timeout: Duration,
    pub testing: bool,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub pidfile_path: PathBuf,
}

impl DaemonSettings {
    /// Output to the controlling terminal and a `/tmp/<worker>.pid` pidfile.
    pub fn for_worker(worker: &str, action: LifecycleAction, defaults: WorkerDefaults) -> Self {
        Self {
            action,
            sleep_time: defaults.sleep_time,
            pid_timeout: defaults.pid_timeout,
            testing: false,
            stdout_path: PathBuf::from("/dev/tty"),
            stderr_path: PathBuf::from("/dev/tty"),
            pidfile_path: PathBuf::from(format!("/tmp/{worker}.pid")),
        }
    }
}

/// A resolved, constructed worker ready to be driven.
pub struct Daemon {
    /// Short group name, as the operator typed it.
    pub group: String,
    /// Worker type name; also the name it is registered under.
    pub name: String,
    pub settings: DaemonSettings,
    pub worker: Box<dyn Worker>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Performs one lifecycle action on a daemon.
///
/// Returns only when the action is complete: for `stop`, after the target
/// process has been confirmed gone.
#[async_trait]
pub trait DaemonRunner: Send + Sync {
    async fn perform_action(&self, daemon: Daemon) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_follow_worker_name() {
        let settings =
            DaemonSettings::for_worker("Heartbeat", LifecycleAction::Start, WorkerDefaults::default());
        assert_eq!(settings.pidfile_path, PathBuf::from("/tmp/Heartbeat.pid"));
        assert_eq!(settings.stdout_path, PathBuf::from("/dev/tty"));
        assert_eq!(settings.sleep_time, Duration::from_secs(10));
        assert_eq!(settings.pid_timeout, Duration::from_secs(5));
    }
}
