//! Tracing and logging setup shared by the platform binaries.

pub mod logging;

pub use logging::{LogFormat, ParseLogFormatError};

/// Initialize process-wide logging with the format from `PROFHUB_LOG_FORMAT`
/// (JSON when unset).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    logging::init(LogFormat::from_env());
}

/// Initialize process-wide logging with an explicit format.
pub fn init_with(format: LogFormat) {
    logging::init(format);
}
