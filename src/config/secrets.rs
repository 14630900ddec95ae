//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for the registry credentials.

pub use secrecy::{ExposeSecret, SecretString};
