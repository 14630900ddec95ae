//! # daemonizer
//!
//! Lifecycle supervisor for long-running worker daemons.
//!
//! Resolves workers from an explicit catalog of groups, drives them through
//! a pidfile-based runner (start/stop/restart), keeps a Postgres registry of
//! known workers with append-only action and task logs, and runs each
//! group's test suite.

pub mod catalog;
pub mod config;
pub mod daemon;
pub mod daemons;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod registrar;
pub mod store;
pub mod telemetry;
pub mod test_runner;
pub mod worker;
