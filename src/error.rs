//! Error types for daemonizer.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("worker group not found: {0}")]
    GroupNotFound(String),

    #[error("worker '{worker}' not found in group {group}")]
    WorkerNotFound { group: String, worker: String },

    #[error("process '{0}' does not exist in database")]
    NotRegistered(String),

    #[error("test case '{test}' not found in {suite}")]
    TestNotFound { suite: String, test: String },

    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("store connection lost and retry failed: {0}")]
    StoreConnection(#[source] sqlx::Error),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("daemon already running with pid {pid} (pidfile {})", pidfile.display())]
    AlreadyRunning { pid: i32, pidfile: PathBuf },

    #[error("daemon not running (pidfile {} is not held)", .0.display())]
    NotRunning(PathBuf),

    #[error("daemon with pid {pid} did not exit within {timeout:?}")]
    StopTimeout { pid: i32, timeout: Duration },

    #[error("failed to detach daemon: {0}")]
    Daemonize(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
