//! Registry store.
//!
//! Durable record of known workers plus append-only logs of lifecycle
//! actions and completed tasks. A `RegistryStore` owns one backend connection
//! and a private name → id index rebuilt every time a store is opened.
//!
//! Every write commits on its own. A statement that fails because the
//! connection went away triggers one reconnect and one retry of that same
//! statement; a second failure surfaces as [`Error::StoreConnection`].

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{LifecycleAction, WorkerId, WorkerRecord};
use crate::telemetry::metrics;

/// The relational collaborator: four parameterized statements plus
/// connection management.
#[async_trait]
pub trait Backend: Send {
    /// Open the connection. Must be a no-op when already connected.
    async fn connect(&mut self) -> sqlx::Result<()>;

    /// `SELECT id, name FROM workers`
    async fn fetch_workers(&mut self) -> sqlx::Result<Vec<WorkerRecord>>;

    /// Insert a worker by name, returning its id. An existing name returns
    /// the existing id instead of failing.
    async fn insert_worker(&mut self, name: &str) -> sqlx::Result<WorkerId>;

    async fn insert_action(
        &mut self,
        worker: WorkerId,
        action: LifecycleAction,
    ) -> sqlx::Result<()>;

    async fn insert_task(
        &mut self,
        worker: WorkerId,
        task_type: &str,
        description: &str,
    ) -> sqlx::Result<()>;

    /// Release the connection. Safe to call when not connected.
    async fn close(&mut self);
}

/// Produces fresh, unconnected backends.
pub trait Connector: Send + Sync {
    fn backend(&self) -> Box<dyn Backend>;
}

/// Errors that mean the connection itself is gone, as opposed to the
/// statement being rejected. The server reports a terminated session as a
/// database error, so its SQLSTATE decides.
pub(crate) fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_connection_sqlstate(&code)),
        _ => false,
    }
}

/// Class 08 (connection exception), plus the operator-intervention codes
/// for a backend killed by shutdown or `pg_terminate_backend` (57P01),
/// crash recovery (57P02) and a server not yet accepting connections (57P03).
fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}

/// Error returned by backends asked to run a statement while disconnected.
pub(crate) fn not_connected() -> sqlx::Error {
    sqlx::Error::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "registry store is not connected",
    ))
}

/// Run one backend statement, reconnecting and retrying once on a
/// transient failure.
macro_rules! with_retry {
    ($store:expr, $backend:ident => $call:expr) => {{
        let first = {
            let $backend = $store.backend.as_mut();
            $call.await
        };
        match first {
            Ok(value) => Ok(value),
            Err(err) if is_transient(&err) => {
                $store.reconnect(&err).await?;
                let $backend = $store.backend.as_mut();
                $call.await.map_err(|err| {
                    if is_transient(&err) {
                        Error::StoreConnection(err)
                    } else {
                        Error::Database(err)
                    }
                })
            }
            Err(err) => Err(Error::Database(err)),
        }
    }};
}

/// Store handle owning one connection and the worker index.
pub struct RegistryStore {
    backend: Box<dyn Backend>,
    index: HashMap<String, WorkerId>,
}

impl RegistryStore {
    /// Wrap an unconnected backend. Call [`connect`](Self::connect) and
    /// [`load_index`](Self::load_index) before use, or use [`open`](Self::open).
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            index: HashMap::new(),
        }
    }

    /// Connect a fresh backend from `connector` and load the index.
    pub async fn open(connector: &dyn Connector) -> Result<Self> {
        let mut store = Self::new(connector.backend());
        store.connect().await?;
        store.load_index().await?;
        Ok(store)
    }

    /// Establish the connection. Idempotent.
    pub async fn connect(&mut self) -> Result<()> {
        self.backend
            .connect()
            .await
            .map_err(Error::StoreConnection)
    }

    /// Rebuild the name → id index from every stored worker.
    pub async fn load_index(&mut self) -> Result<()> {
        let workers = with_retry!(self, backend => backend.fetch_workers())?;
        self.index = workers
            .into_iter()
            .map(|record| (record.name, record.id))
            .collect();
        debug!(workers = self.index.len(), "registry index loaded");
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn worker_id(&self, name: &str) -> Option<WorkerId> {
        self.index.get(name).copied()
    }

    /// Insert every name not yet in the index. Names already present are
    /// skipped without error.
    pub async fn register_workers<I, S>(&mut self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            if self.index.contains_key(name) {
                debug!(worker = name, "already registered, skipping");
                continue;
            }
            let id = with_retry!(self, backend => backend.insert_worker(name))?;
            self.index.insert(name.to_string(), id);
            metrics::workers_registered().add(1, &[KeyValue::new("worker", name.to_string())]);
            debug!(worker = name, %id, "worker registered");
        }
        Ok(())
    }

    /// Record a lifecycle action against a registered worker.
    pub async fn append_action(&mut self, name: &str, action: LifecycleAction) -> Result<()> {
        let id = self.require(name)?;
        with_retry!(self, backend => backend.insert_action(id, action))?;
        metrics::actions().add(
            1,
            &[
                KeyValue::new("worker", name.to_string()),
                KeyValue::new("action", action.as_str()),
            ],
        );
        Ok(())
    }

    /// Record a completed task against a registered worker.
    pub async fn append_task(
        &mut self,
        name: &str,
        task_type: &str,
        description: &str,
    ) -> Result<()> {
        let id = self.require(name)?;
        with_retry!(self, backend => backend.insert_task(id, task_type, description))?;
        metrics::tasks_completed().add(
            1,
            &[
                KeyValue::new("worker", name.to_string()),
                KeyValue::new("task_type", task_type.to_string()),
            ],
        );
        Ok(())
    }

    /// Release the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        self.backend.close().await;
    }

    fn require(&self, name: &str) -> Result<WorkerId> {
        self.worker_id(name)
            .ok_or_else(|| Error::NotRegistered(name.to_string()))
    }

    async fn reconnect(&mut self, cause: &sqlx::Error) -> Result<()> {
        warn!(error = %cause, "registry store connection lost, reconnecting");
        metrics::store_reconnects().add(1, &[]);
        self.backend.close().await;
        self.backend
            .connect()
            .await
            .map_err(Error::StoreConnection)
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryConnector;
    use super::*;

    #[tokio::test]
    async fn index_is_rebuilt_on_open() {
        let connector = MemoryConnector::new();
        connector.seed_worker("Fetcher");

        let store = RegistryStore::open(&connector).await.unwrap();
        assert!(store.is_registered("Fetcher"));
        assert!(!store.is_registered("Cleaner"));
    }

    #[tokio::test]
    async fn index_is_private_to_each_store() {
        let connector = MemoryConnector::new();
        let mut first = RegistryStore::open(&connector).await.unwrap();
        let second = RegistryStore::open(&connector).await.unwrap();

        first.register_workers(["Fetcher"]).await.unwrap();

        assert!(first.is_registered("Fetcher"));
        assert!(!second.is_registered("Fetcher"));
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let connector = MemoryConnector::new();
        let mut store = RegistryStore::open(&connector).await.unwrap();
        let connects_before = connector.connects();

        connector.drop_connection(1);
        store.register_workers(["Fetcher"]).await.unwrap();

        assert_eq!(connector.workers().len(), 1);
        assert_eq!(connector.connects(), connects_before + 1);
    }

    #[tokio::test]
    async fn second_transient_failure_surfaces_store_connection_error() {
        let connector = MemoryConnector::new();
        let mut store = RegistryStore::open(&connector).await.unwrap();

        connector.drop_connection(2);
        let err = store.register_workers(["Fetcher"]).await.unwrap_err();

        assert!(matches!(err, Error::StoreConnection(_)), "got {err:?}");
        assert!(connector.workers().is_empty());
    }

    #[tokio::test]
    async fn terminated_server_session_is_retried_once() {
        let connector = MemoryConnector::new();
        let mut store = RegistryStore::open(&connector).await.unwrap();
        store.register_workers(["Fetcher"]).await.unwrap();
        let connects_before = connector.connects();

        connector.terminate_backend(1);
        store
            .append_action("Fetcher", LifecycleAction::Start)
            .await
            .unwrap();

        assert_eq!(connector.actions_for("Fetcher"), vec![LifecycleAction::Start]);
        assert_eq!(connector.connects(), connects_before + 1);
    }

    #[tokio::test]
    async fn repeated_server_termination_surfaces_store_connection_error() {
        let connector = MemoryConnector::new();
        let mut store = RegistryStore::open(&connector).await.unwrap();
        store.register_workers(["Fetcher"]).await.unwrap();

        connector.terminate_backend(2);
        let err = store
            .append_task("Fetcher", "fetch", "fetched 3 feeds")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StoreConnection(_)), "got {err:?}");
        assert!(connector.tasks().is_empty());
    }

    #[test]
    fn sqlstate_decides_whether_database_errors_are_transient() {
        use super::memory::server_error;

        for code in ["08000", "08003", "08006", "57P01", "57P02", "57P03"] {
            assert!(is_transient(&server_error(code, "gone")), "{code}");
        }
        for code in ["23503", "23505", "42P01", "57014"] {
            assert!(!is_transient(&server_error(code, "rejected")), "{code}");
        }
        assert!(!is_transient(&sqlx::Error::RowNotFound));
    }

    #[tokio::test]
    async fn closed_store_reconnects_on_next_statement() {
        let connector = MemoryConnector::new();
        let mut store = RegistryStore::open(&connector).await.unwrap();
        store.register_workers(["Fetcher"]).await.unwrap();

        store.close().await;
        store.close().await;
        store
            .append_action("Fetcher", LifecycleAction::Start)
            .await
            .unwrap();

        assert_eq!(connector.actions().len(), 1);
    }
}
