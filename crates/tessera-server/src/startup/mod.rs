//! Application startup utilities module.

mod logging;
mod shutdown;

pub use logging::{LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::{ShutdownSignal, listen_for_shutdown_signal, wait_for_shutdown};
