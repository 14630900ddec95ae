//! Detaching a daemon from the operator's session.
//!
//! `daemonize` forks twice, so [`detach`] may only be called while the
//! process has a single thread: no async runtime and no telemetry exporter
//! may be alive yet. The daemon's stdin is `/dev/null` and its working
//! directory is `/`.

use std::fs::{File, OpenOptions};
use std::path::Path;

use daemonize::{Daemonize, Outcome};

use super::DaemonSettings;
use crate::error::{Error, Result};

/// Which side of the fork [`detach`] returned on.
#[derive(Debug)]
pub enum Detached {
    /// Still the operator's process.
    Parent,
    /// The daemon. Carries the error if setup failed after forking, e.g. a
    /// concurrent start claimed the pidfile first.
    Daemon(Result<()>),
}

/// Fork off a daemon that holds `settings.pidfile_path` for its lifetime,
/// with stdout and stderr appended to the configured paths.
pub fn detach(settings: &DaemonSettings) -> Result<Detached> {
    let stdout = open_append(&settings.stdout_path)?;
    let stderr = open_append(&settings.stderr_path)?;

    let daemonize = Daemonize::new()
        .pid_file(&settings.pidfile_path)
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    match daemonize.execute() {
        Outcome::Parent(Ok(_)) => Ok(Detached::Parent),
        Outcome::Parent(Err(e)) => Err(Error::Daemonize(e.to_string())),
        Outcome::Child(Ok(_)) => Ok(Detached::Daemon(Ok(()))),
        Outcome::Child(Err(e)) => Ok(Detached::Daemon(Err(Error::Daemonize(e.to_string())))),
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LifecycleAction;
    use crate::worker::WorkerDefaults;

    #[test]
    fn unwritable_log_path_fails_before_forking() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings =
            DaemonSettings::for_worker("Probe", LifecycleAction::Start, WorkerDefaults::default());
        settings.pidfile_path = dir.path().join("Probe.pid");
        settings.stdout_path = dir.path().join("missing").join("out.log");

        let err = detach(&settings).unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got {err:?}");
        assert!(!settings.pidfile_path.exists());
    }
}
