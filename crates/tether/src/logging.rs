//! Logging setup for applications and demos.
//!
//! The library crates only emit `tracing` events. Nothing is printed until
//! the application installs a subscriber, either its own or the one below.

use tracing_subscriber::EnvFilter;

use crate::TetherError;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (for example `"tether=debug,info"`) when the
/// variable is unset or invalid.
///
/// # Errors
/// [`TetherError::Tracing`] if the directive doesn't parse or a global
/// subscriber is already installed.
pub fn init_tracing(default_directive: &str) -> Result<(), TetherError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| TetherError::Tracing(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| TetherError::Tracing(e.to_string()))
}
