//! Process-wide tracing setup shared by the curtainworks binaries.

/// Tracing subscriber installation.
pub mod tracing;

pub use crate::tracing::{DEFAULT_FILTER, init_with_filter};

/// Initialize JSON tracing filtered by `RUST_LOG` (default [`DEFAULT_FILTER`]).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}
