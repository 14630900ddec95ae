//! In-process registry backend.
//!
//! Tables live behind a shared mutex owned by the [`MemoryConnector`], so
//! every backend it hands out (every "fresh connection") sees the same rows.
//! Used by tests and by dry runs that should not touch Postgres.

use std::borrow::Cow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::{Backend, Connector, not_connected};
use crate::model::{ActionLogEntry, LifecycleAction, TaskLogEntry, WorkerId, WorkerRecord};

#[derive(Debug, Default)]
struct Tables {
    workers: Vec<WorkerRecord>,
    actions: Vec<ActionLogEntry>,
    tasks: Vec<TaskLogEntry>,
    next_id: i64,
    connects: u64,
    /// Number of upcoming statements that fail as if the connection dropped.
    pending_drops: u32,
    drop_kind: Disconnect,
}

/// How a scheduled drop presents itself to the statement that hits it.
#[derive(Debug, Clone, Copy, Default)]
enum Disconnect {
    /// The socket goes away underneath the client.
    #[default]
    Reset,
    /// The server ends the session and says so (SQLSTATE 57P01).
    AdminShutdown,
}

impl Tables {
    fn insert_worker(&mut self, name: &str) -> WorkerId {
        if let Some(existing) = self.workers.iter().find(|w| w.name == name) {
            return existing.id;
        }
        self.next_id += 1;
        let id = WorkerId(self.next_id);
        self.workers.push(WorkerRecord {
            id,
            name: name.to_string(),
        });
        id
    }

    fn has_worker(&self, id: WorkerId) -> bool {
        self.workers.iter().any(|w| w.id == id)
    }
}

/// Hands out [`MemoryBackend`]s sharing one set of tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a worker directly, bypassing any store.
    pub fn seed_worker(&self, name: &str) -> WorkerId {
        self.lock().insert_worker(name)
    }

    /// Make the next `times` statements fail with a dropped connection.
    pub fn drop_connection(&self, times: u32) {
        self.schedule_drops(times, Disconnect::Reset);
    }

    /// Make the next `times` statements fail as if an administrator had
    /// terminated the server session.
    pub fn terminate_backend(&self, times: u32) {
        self.schedule_drops(times, Disconnect::AdminShutdown);
    }

    fn schedule_drops(&self, times: u32, kind: Disconnect) {
        let mut tables = self.lock();
        tables.pending_drops = times;
        tables.drop_kind = kind;
    }

    pub fn workers(&self) -> Vec<WorkerRecord> {
        self.lock().workers.clone()
    }

    pub fn actions(&self) -> Vec<ActionLogEntry> {
        self.lock().actions.clone()
    }

    pub fn tasks(&self) -> Vec<TaskLogEntry> {
        self.lock().tasks.clone()
    }

    /// Actions logged against the worker called `name`.
    pub fn actions_for(&self, name: &str) -> Vec<LifecycleAction> {
        let tables = self.lock();
        let Some(id) = tables.workers.iter().find(|w| w.name == name).map(|w| w.id) else {
            return Vec::new();
        };
        tables
            .actions
            .iter()
            .filter(|a| a.worker_id == id)
            .map(|a| a.action)
            .collect()
    }

    /// Total successful connects across all backends.
    pub fn connects(&self) -> u64 {
        self.lock().connects
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Connector for MemoryConnector {
    fn backend(&self) -> Box<dyn Backend> {
        Box::new(MemoryBackend {
            tables: Arc::clone(&self.tables),
            connected: false,
        })
    }
}

/// One "connection" to the shared tables.
pub struct MemoryBackend {
    tables: Arc<Mutex<Tables>>,
    connected: bool,
}

impl MemoryBackend {
    /// Lock the tables for one statement, honouring disconnects and
    /// scheduled drops.
    fn statement(&mut self) -> sqlx::Result<MutexGuard<'_, Tables>> {
        if !self.connected {
            return Err(not_connected());
        }
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        if tables.pending_drops > 0 {
            tables.pending_drops -= 1;
            self.connected = false;
            return Err(match tables.drop_kind {
                Disconnect::Reset => sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )),
                Disconnect::AdminShutdown => server_error(
                    "57P01",
                    "terminating connection due to administrator command",
                ),
            });
        }
        Ok(tables)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn connect(&mut self) -> sqlx::Result<()> {
        if !self.connected {
            self.tables
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .connects += 1;
            self.connected = true;
        }
        Ok(())
    }

    async fn fetch_workers(&mut self) -> sqlx::Result<Vec<WorkerRecord>> {
        Ok(self.statement()?.workers.clone())
    }

    async fn insert_worker(&mut self, name: &str) -> sqlx::Result<WorkerId> {
        Ok(self.statement()?.insert_worker(name))
    }

    async fn insert_action(
        &mut self,
        worker: WorkerId,
        action: LifecycleAction,
    ) -> sqlx::Result<()> {
        let mut tables = self.statement()?;
        if !tables.has_worker(worker) {
            return Err(foreign_key_violation("worker_actions", worker));
        }
        tables.actions.push(ActionLogEntry {
            worker_id: worker,
            action,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn insert_task(
        &mut self,
        worker: WorkerId,
        task_type: &str,
        description: &str,
    ) -> sqlx::Result<()> {
        let mut tables = self.statement()?;
        if !tables.has_worker(worker) {
            return Err(foreign_key_violation("worker_tasks", worker));
        }
        tables.tasks.push(TaskLogEntry {
            worker_id: worker,
            task_type: task_type.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn close(&mut self) {
        self.connected = false;
    }
}

/// An error reported by the server, identified by its SQLSTATE.
#[derive(Debug, thiserror::Error)]
#[error("{message} (SQLSTATE {code})")]
struct ServerError {
    code: &'static str,
    message: String,
}

impl sqlx::error::DatabaseError for ServerError {
    fn message(&self) -> &str {
        &self.message
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self.code))
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        match self.code {
            "23503" => sqlx::error::ErrorKind::ForeignKeyViolation,
            "23505" => sqlx::error::ErrorKind::UniqueViolation,
            _ => sqlx::error::ErrorKind::Other,
        }
    }
}

pub(crate) fn server_error(code: &'static str, message: impl Into<String>) -> sqlx::Error {
    sqlx::Error::Database(Box::new(ServerError {
        code,
        message: message.into(),
    }))
}

fn foreign_key_violation(table: &str, worker: WorkerId) -> sqlx::Error {
    server_error(
        "23503",
        format!("insert into {table} violates foreign key: worker {worker} does not exist"),
    )
}
