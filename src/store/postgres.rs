//! Postgres registry backend via direct SQLx.
//!
//! Holds a single `PgConnection` rather than a pool: each process that
//! touches the registry owns exactly one connection and closes it itself.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};

use super::{Backend, Connector, not_connected};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::model::{LifecycleAction, WorkerId, WorkerRecord};

/// Builds Postgres backends from connection parameters.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    pub fn new(config: &StoreConfig) -> Self {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(config.password.expose_secret())
            .database(&config.database);
        Self { options }
    }

    /// Use explicit options, e.g. parsed from a `postgres://` URL.
    pub fn from_options(options: PgConnectOptions) -> Self {
        Self { options }
    }

    /// Run all pending migrations over a short-lived connection.
    pub async fn migrate(&self) -> Result<()> {
        let mut conn = PgConnection::connect_with(&self.options).await?;
        sqlx::migrate!("./migrations").run(&mut conn).await?;
        conn.close().await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = PgConnection::connect_with(&self.options).await?;
        sqlx::query("SELECT 1").execute(&mut conn).await?;
        conn.close().await?;
        Ok(())
    }
}

impl Connector for PgConnector {
    fn backend(&self) -> Box<dyn Backend> {
        Box::new(PgBackend {
            options: self.options.clone(),
            conn: None,
        })
    }
}

/// One autocommit connection to the registry database.
pub struct PgBackend {
    options: PgConnectOptions,
    conn: Option<PgConnection>,
}

impl PgBackend {
    fn conn(&mut self) -> sqlx::Result<&mut PgConnection> {
        self.conn.as_mut().ok_or_else(not_connected)
    }
}

#[async_trait]
impl Backend for PgBackend {
    async fn connect(&mut self) -> sqlx::Result<()> {
        if self.conn.is_none() {
            self.conn = Some(PgConnection::connect_with(&self.options).await?);
        }
        Ok(())
    }

    async fn fetch_workers(&mut self) -> sqlx::Result<Vec<WorkerRecord>> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM workers")
            .fetch_all(self.conn()?)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name)| WorkerRecord {
                id: WorkerId(id),
                name,
            })
            .collect())
    }

    async fn insert_worker(&mut self, name: &str) -> sqlx::Result<WorkerId> {
        // The no-op update makes RETURNING yield the existing id on conflict.
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO workers (name) VALUES ($1)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id",
        )
        .bind(name)
        .fetch_one(self.conn()?)
        .await?;
        Ok(WorkerId(row.0))
    }

    async fn insert_action(
        &mut self,
        worker: WorkerId,
        action: LifecycleAction,
    ) -> sqlx::Result<()> {
        sqlx::query("INSERT INTO worker_actions (worker_id, action) VALUES ($1, $2)")
            .bind(worker.0)
            .bind(action.as_str())
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn insert_task(
        &mut self,
        worker: WorkerId,
        task_type: &str,
        description: &str,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO worker_tasks (worker_id, task_type, description) VALUES ($1, $2, $3)",
        )
        .bind(worker.0)
        .bind(task_type)
        .bind(description)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "error while closing registry connection");
            }
        }
    }
}
