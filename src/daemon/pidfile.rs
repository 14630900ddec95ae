//! Pidfile-based daemon runner.
//!
//! A running daemon holds an exclusive `flock` on `/tmp/<Worker>.pid` (or
//! whatever its settings say) for as long as it lives, and the pid inside
//! names it. The file is never removed: a pidfile nobody has locked is stale
//! whatever it records, and the next claimant simply locks and rewrites it.
//! Detached daemons get their lock from `daemonize` (see [`super::detach`]),
//! foreground ones from [`Pidfile::acquire`].

use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

use super::{Daemon, DaemonRunner, DaemonSettings};
use crate::error::{Error, Result};
use crate::model::LifecycleAction;
use crate::store::{Connector, RegistryStore};
use crate::worker;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Whether `start` detaches into a background process or runs in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Detach,
    Foreground,
}

/// Is there a process with this pid? A process we may not signal still exists.
fn is_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// A pidfile on disk.
#[derive(Debug, Clone)]
pub struct Pidfile {
    path: PathBuf,
}

impl Pidfile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pid recorded in the file, if the file exists and holds a positive pid.
    pub fn read(&self) -> Result<Option<i32>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match content.trim().parse::<i32>() {
                Ok(pid) if pid > 0 => Ok(Some(pid)),
                _ => {
                    if !content.trim().is_empty() {
                        warn!(pidfile = %self.path.display(), "ignoring unparsable pidfile");
                    }
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Pid of the process holding the lock. `None` when the file is missing
    /// or nobody has it locked.
    pub fn holder(&self) -> Result<Option<i32>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match Flock::lock(file, FlockArg::LockSharedNonblock) {
            Ok(_unheld) => Ok(None),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => match self.read()? {
                Some(pid) => Ok(Some(pid)),
                None => Err(Error::Other(format!(
                    "pidfile {} is locked but records no pid",
                    self.path.display()
                ))),
            },
            Err((_, errno)) => Err(Error::Io(errno.into())),
        }
    }

    /// Lock the pidfile for this process and record its pid, or fail with
    /// `AlreadyRunning` if another holder has it.
    pub fn try_acquire(&self) -> Result<PidfileLock> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        let lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                return Err(Error::AlreadyRunning {
                    pid: self.read()?.unwrap_or_default(),
                    pidfile: self.path.clone(),
                });
            }
            Err((_, errno)) => return Err(Error::Io(errno.into())),
        };

        let mut file: &File = &lock;
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(PidfileLock { _lock: lock })
    }

    /// Claim the pidfile, waiting up to `timeout` for a current holder to
    /// let go first.
    pub async fn acquire(&self, timeout: Duration) -> Result<PidfileLock> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_acquire() {
                Err(Error::AlreadyRunning { pid, .. }) if Instant::now() < deadline => {
                    debug!(pid, pidfile = %self.path.display(), "waiting for pidfile holder");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                claimed => return claimed,
            }
        }
    }
}

/// Held while this process owns the pidfile. Dropping it releases the lock.
#[derive(Debug)]
pub struct PidfileLock {
    _lock: Flock<File>,
}

/// Resolves when SIGTERM or SIGINT arrives. Handlers are installed before
/// this returns, so a signal delivered mid-step is not lost.
pub fn shutdown_signal() -> Result<impl Future<Output = ()> + Send> {
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    Ok(async move {
        tokio::select! {
            _ = term.recv() => info!("received SIGTERM"),
            _ = int.recv() => info!("received SIGINT"),
        }
    })
}

/// The shipped [`DaemonRunner`].
///
/// In [`Mode::Detach`] a start only checks that the worker may run and
/// queues it: forking is left to the caller, which must first drop its
/// async runtime. See [`PidfileRunner::take_launches`].
pub struct PidfileRunner {
    connector: Arc<dyn Connector>,
    mode: Mode,
    launches: Mutex<Vec<Daemon>>,
}

impl PidfileRunner {
    pub fn new(connector: Arc<dyn Connector>, mode: Mode) -> Self {
        Self {
            connector,
            mode,
            launches: Mutex::new(Vec::new()),
        }
    }

    /// Daemons accepted for detaching, in the order they were started.
    pub fn take_launches(&self) -> Vec<Daemon> {
        std::mem::take(&mut *self.launches.lock().unwrap_or_else(PoisonError::into_inner))
    }

    async fn start(&self, daemon: Daemon) -> Result<()> {
        if daemon.settings.testing {
            return worker::run(daemon, self.connector.as_ref(), shutdown_signal()?).await;
        }
        match self.mode {
            Mode::Foreground => self.run_in_place(daemon, shutdown_signal()?).await,
            Mode::Detach => self.queue_launch(daemon).await,
        }
    }

    /// Fail in the caller rather than in a detached child nobody watches.
    async fn queue_launch(&self, daemon: Daemon) -> Result<()> {
        self.ensure_registered(&daemon.name).await?;
        let pidfile = Pidfile::new(&daemon.settings.pidfile_path);
        if let Some(pid) = pidfile.holder()? {
            return Err(Error::AlreadyRunning {
                pid,
                pidfile: daemon.settings.pidfile_path.clone(),
            });
        }
        debug!(worker = %daemon.name, "queued for detach");
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(daemon);
        Ok(())
    }

    async fn ensure_registered(&self, name: &str) -> Result<()> {
        let mut store = RegistryStore::open(self.connector.as_ref()).await?;
        let registered = store.is_registered(name);
        store.close().await;
        if registered {
            Ok(())
        } else {
            Err(Error::NotRegistered(name.to_string()))
        }
    }

    async fn run_in_place<F>(&self, daemon: Daemon, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let pidfile = Pidfile::new(&daemon.settings.pidfile_path);
        let _lock = pidfile.acquire(daemon.settings.pid_timeout).await?;
        info!(worker = %daemon.name, pid = std::process::id(), "daemon started");
        worker::run(daemon, self.connector.as_ref(), shutdown).await
    }
}

#[async_trait]
impl DaemonRunner for PidfileRunner {
    async fn perform_action(&self, daemon: Daemon) -> Result<()> {
        match daemon.settings.action {
            LifecycleAction::Start => self.start(daemon).await,
            LifecycleAction::Stop => stop(&daemon.settings).await,
            LifecycleAction::Restart => {
                match stop(&daemon.settings).await {
                    Ok(()) => {}
                    Err(Error::NotRunning(path)) => {
                        debug!(pidfile = %path.display(), "nothing to stop before restart");
                    }
                    Err(e) => return Err(e),
                }
                self.start(daemon).await
            }
        }
    }
}

/// Signal the pidfile's holder and wait for it to exit.
pub async fn stop(settings: &DaemonSettings) -> Result<()> {
    let pidfile = Pidfile::new(&settings.pidfile_path);
    let pid = pidfile
        .holder()?
        .ok_or_else(|| Error::NotRunning(settings.pidfile_path.clone()))?;

    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(()),
        Err(errno) => return Err(Error::Io(errno.into())),
    }
    info!(pid, "sent SIGTERM");

    let deadline = Instant::now() + settings.pid_timeout;
    while is_alive(pid) {
        if Instant::now() >= deadline {
            return Err(Error::StopTimeout {
                pid,
                timeout: settings.pid_timeout,
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    info!(pid, "daemon stopped");
    Ok(())
}
