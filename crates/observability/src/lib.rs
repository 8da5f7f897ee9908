//! Tracing/logging setup shared by binaries and tests.

/// Initialize process-wide tracing with JSON output and `RUST_LOG` filtering.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    self::tracing::init();
}

pub mod tracing;

pub use self::tracing::{LogFormat, ParseLogFormatError, TracingConfig};
