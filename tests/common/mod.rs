//! Shared fixtures: a `feeds` worker group and a runner that records calls
//! instead of touching processes.

#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use daemonizer::catalog::{Catalog, WorkerGroup, WorkerType};
use daemonizer::daemon::{Daemon, DaemonRunner, DaemonSettings};
use daemonizer::error::{Error, Result};
use daemonizer::store::memory::MemoryConnector;
use daemonizer::worker::{Worker, WorkerContext};

pub struct Fetcher;

#[async_trait]
impl Worker for Fetcher {
    async fn step(&mut self, ctx: &mut WorkerContext<'_>) -> Result<()> {
        ctx.log_task_completion("fetch", "pulled feeds").await
    }
}

pub struct Cleaner;

#[async_trait]
impl Worker for Cleaner {
    async fn step(&mut self, ctx: &mut WorkerContext<'_>) -> Result<()> {
        ctx.log_task_completion("clean", "pruned old entries").await
    }
}

fn fetcher() -> Box<dyn Worker> {
    Box::new(Fetcher)
}

fn cleaner() -> Box<dyn Worker> {
    Box::new(Cleaner)
}

pub fn feeds_group() -> WorkerGroup {
    WorkerGroup::new("feeds")
        .worker(WorkerType::new("Fetcher", fetcher))
        .worker(WorkerType::new("Cleaner", cleaner))
}

pub fn catalog() -> Catalog {
    let mut catalog = Catalog::builtin();
    catalog.register(feeds_group());
    catalog
}

/// What a [`RecordingRunner`] saw for one call.
#[derive(Debug, Clone)]
pub struct Call {
    pub worker: String,
    pub settings: DaemonSettings,
    /// Actions already logged for the worker when the runner was invoked.
    pub actions_logged_before: usize,
}

/// Records each call. Workers named in `fail` return an error.
pub struct RecordingRunner {
    connector: MemoryConnector,
    fail: Vec<String>,
    calls: Mutex<Vec<Call>>,
}

impl RecordingRunner {
    pub fn new(connector: &MemoryConnector) -> Self {
        Self {
            connector: connector.clone(),
            fail: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, worker: &str) -> Self {
        self.fail.push(worker.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DaemonRunner for RecordingRunner {
    async fn perform_action(&self, daemon: Daemon) -> Result<()> {
        self.calls.lock().unwrap().push(Call {
            worker: daemon.name.clone(),
            settings: daemon.settings.clone(),
            actions_logged_before: self.connector.actions_for(&daemon.name).len(),
        });
        if self.fail.contains(&daemon.name) {
            return Err(Error::Other(format!("{} refused to {}", daemon.name, daemon.settings.action)));
        }
        Ok(())
    }
}
