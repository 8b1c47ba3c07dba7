//! Process-wide logging setup shared by the binaries.

/// Install the global subscriber; later calls are no-ops.
pub fn init() {
    tracing::init();
}

/// `RUST_LOG` filtering and `LOG_FORMAT` selection.
pub mod tracing;
