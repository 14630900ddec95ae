//! Worker groups shipped with daemonizer.

pub mod sample;
