//! Worker groups and their worker types.
//!
//! Groups are registered explicitly at startup; nothing is discovered by
//! reflection. A group is addressed either by its short name (`sample`) or
//! by its qualified name (`daemons.sample`).

use std::collections::BTreeMap;

use crate::daemon::{Daemon, DaemonSettings};
use crate::error::{Error, Result};
use crate::test_runner::TestSuite;
use crate::worker::{Worker, WorkerDefaults, WorkerOptions};

/// Namespace every group name is qualified with.
pub const GROUP_PREFIX: &str = "daemons";

/// `sample` → `daemons.sample`. Already-qualified names pass through.
pub fn qualify(group: &str) -> String {
    if group.starts_with(&format!("{GROUP_PREFIX}.")) {
        group.to_string()
    } else {
        format!("{GROUP_PREFIX}.{group}")
    }
}

/// A constructable worker type.
#[derive(Debug, Clone, Copy)]
pub struct WorkerType {
    pub name: &'static str,
    pub defaults: WorkerDefaults,
    pub build: fn() -> Box<dyn Worker>,
}

impl WorkerType {
    pub fn new(name: &'static str, build: fn() -> Box<dyn Worker>) -> Self {
        Self {
            name,
            defaults: WorkerDefaults::default(),
            build,
        }
    }

    pub fn defaults(mut self, defaults: WorkerDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Instantiate the worker. Options left as `None` keep this type's defaults.
    pub fn construct(&self, group: &str, options: &WorkerOptions) -> Daemon {
        let mut settings = DaemonSettings::for_worker(self.name, options.action, self.defaults);
        if let Some(sleep_time) = options.sleep_time {
            settings.sleep_time = sleep_time;
        }
        if let Some(pid_timeout) = options.pid_timeout {
            settings.pid_timeout = pid_timeout;
        }
        settings.testing = options.testing;

        let mut worker = (self.build)();
        worker.configure(&settings);

        Daemon {
            group: group.to_string(),
            name: self.name.to_string(),
            settings,
            worker,
        }
    }
}

/// A named bundle of worker types and, optionally, their tests.
#[derive(Debug, Clone)]
pub struct WorkerGroup {
    name: String,
    workers: BTreeMap<&'static str, WorkerType>,
    tests: Option<TestSuite>,
}

impl WorkerGroup {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            workers: BTreeMap::new(),
            tests: None,
        }
    }

    pub fn worker(mut self, worker: WorkerType) -> Self {
        self.workers.insert(worker.name, worker);
        self
    }

    pub fn tests(mut self, suite: TestSuite) -> Self {
        self.tests = Some(suite);
        self
    }

    /// Short name, e.g. `sample`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Qualified name, e.g. `daemons.sample`.
    pub fn qualified_name(&self) -> String {
        qualify(&self.name)
    }

    /// Names of every worker type in the group, sorted.
    pub fn list_worker_types(&self) -> Vec<&'static str> {
        self.workers.keys().copied().collect()
    }

    pub fn resolve_worker_type(&self, worker: &str) -> Result<&WorkerType> {
        self.workers.get(worker).ok_or_else(|| Error::WorkerNotFound {
            group: self.qualified_name(),
            worker: worker.to_string(),
        })
    }

    pub fn test_suite(&self) -> Option<&TestSuite> {
        self.tests.as_ref()
    }
}

/// Registry of every group known to this binary.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    groups: BTreeMap<String, WorkerGroup>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The groups shipped with daemonizer.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(crate::daemons::sample::group());
        catalog
    }

    /// Add a group, replacing one with the same name.
    pub fn register(&mut self, group: WorkerGroup) -> &mut Self {
        self.groups.insert(group.qualified_name(), group);
        self
    }

    pub fn resolve_group(&self, group: &str) -> Result<&WorkerGroup> {
        let qualified = qualify(group);
        self.groups
            .get(&qualified)
            .ok_or(Error::GroupNotFound(qualified))
    }

    /// Short names of every registered group, sorted.
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.values().map(WorkerGroup::name).collect()
    }
}
