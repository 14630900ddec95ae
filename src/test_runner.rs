//! Per-group test suites.
//!
//! A group may ship a suite (`daemons.<group>.tests`) made of modules. Only
//! modules named `test_*` are loaded. Cases are keyed by name across the
//! whole suite; when two modules define the same case name, the module that
//! sorts later wins and a warning is logged.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::error::{Error, Result};

pub const TEST_MODULE_PREFIX: &str = "test_";

pub type TestFn = fn() -> anyhow::Result<()>;

#[derive(Debug, Clone, Copy)]
pub struct TestCase {
    pub name: &'static str,
    pub run: TestFn,
}

impl TestCase {
    pub fn new(name: &'static str, run: TestFn) -> Self {
        Self { name, run }
    }
}

#[derive(Debug, Clone)]
pub struct TestModule {
    pub name: &'static str,
    pub cases: Vec<TestCase>,
}

/// The modules registered for one group.
#[derive(Debug, Clone, Default)]
pub struct TestSuite {
    modules: Vec<TestModule>,
}

impl TestSuite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, name: &'static str, cases: Vec<TestCase>) -> Self {
        self.modules.push(TestModule { name, cases });
        self
    }

    /// Cases from every `test_*` module, keyed by case name.
    fn collect(&self) -> BTreeMap<&'static str, (&'static str, TestCase)> {
        let mut modules: Vec<&TestModule> = self
            .modules
            .iter()
            .filter(|m| m.name.starts_with(TEST_MODULE_PREFIX))
            .collect();
        modules.sort_by_key(|m| m.name);

        let mut cases = BTreeMap::new();
        for module in modules {
            for case in &module.cases {
                if let Some((previous, _)) = cases.insert(case.name, (module.name, *case)) {
                    warn!(
                        case = case.name,
                        replaced = previous,
                        by = module.name,
                        "duplicate test case name"
                    );
                }
            }
        }
        cases
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub name: String,
    pub module: String,
    /// `None` on success, the failure or panic message otherwise.
    pub failure: Option<String>,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct TestReport {
    pub suite: String,
    pub outcomes: Vec<TestOutcome>,
}

impl TestReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.passed()).count()
    }

    pub fn success(&self) -> bool {
        self.failures() == 0
    }
}

impl std::fmt::Display for TestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for outcome in &self.outcomes {
            let status = if outcome.passed() { "ok" } else { "FAILED" };
            writeln!(f, "{} ({}) ... {status}", outcome.name, outcome.module)?;
        }
        for outcome in self.outcomes.iter().filter(|o| !o.passed()) {
            writeln!(f, "\nFAIL: {} ({})", outcome.name, outcome.module)?;
            writeln!(f, "{}", outcome.failure.as_deref().unwrap_or_default())?;
        }
        writeln!(f, "\nRan {} test(s) from {}", self.outcomes.len(), self.suite)?;
        if self.success() {
            write!(f, "OK")
        } else {
            write!(f, "FAILED (failures={})", self.failures())
        }
    }
}

pub struct TestRunner<'a> {
    catalog: &'a Catalog,
}

impl<'a> TestRunner<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Run one named case, or every case, of a group's suite.
    ///
    /// Fails before running anything if the group has no suite or the
    /// requested case does not exist.
    pub fn run(&self, group: &str, test: Option<&str>) -> Result<TestReport> {
        let group = self.catalog.resolve_group(group)?;
        let suite_name = format!("{}.tests", group.qualified_name());
        let suite = group
            .test_suite()
            .ok_or_else(|| Error::GroupNotFound(suite_name.clone()))?;

        let cases = suite.collect();
        let selected: Vec<(&'static str, TestCase)> = match test {
            Some(name) => match cases.get(name) {
                Some(entry) => vec![*entry],
                None => {
                    return Err(Error::TestNotFound {
                        suite: suite_name,
                        test: name.to_string(),
                    });
                }
            },
            None => cases.into_values().collect(),
        };

        info!(suite = %suite_name, cases = selected.len(), "running tests");
        let outcomes = selected
            .into_iter()
            .map(|(module, case)| TestOutcome {
                name: case.name.to_string(),
                module: module.to_string(),
                failure: run_case(case),
            })
            .collect();

        Ok(TestReport {
            suite: suite_name,
            outcomes,
        })
    }
}

fn run_case(case: TestCase) -> Option<String> {
    match catch_unwind(AssertUnwindSafe(case.run)) {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(payload) => Some(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
