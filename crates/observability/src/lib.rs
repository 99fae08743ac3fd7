//! Process-wide tracing setup shared by every binary embedding the auth core.

pub mod tracing;

pub use crate::tracing::{LogConfig, LogFormat};

/// Install the default JSON subscriber (filter from `RUST_LOG`, falling back to `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init_with(&LogConfig::default());
}

/// Like [`init`] with an explicit format and fallback filter.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_with(config: &LogConfig) -> bool {
    tracing::init_with(config)
}
