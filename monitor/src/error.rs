//! Error types for the Treeline Monitor.
//!
//! Collaborator-specific errors live next to their traits. Summary and
//! classifier failures are absorbed inside the monitor and surfaced through
//! published state; only configuration and fetch errors reach callers.

use thiserror::Error;

use crate::config::ConfigError;
use crate::fetcher::FetchError;

/// Errors that can occur during monitor operations.
///
/// Only a [`MonitorError`] returned from an update cycle counts towards the
/// circuit breaker; every other failure is absorbed inside the cycle and
/// surfaced through published state.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The change-set could not be fetched.
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
}

/// A specialized `Result` type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
