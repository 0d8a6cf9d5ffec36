//! Host-handshake argv contract, runtime configuration, and the
//! parent-liveness watchdog.

mod config;
mod error;
mod handshake;
mod watchdog;

pub use config::{ChildConfig, CORRELATION_PREFIX_ENV, DISPATCH_POLL_TIMEOUT_ENV, WATCHDOG_INTERVAL_ENV};
pub use error::HandshakeError;
pub use handshake::{parse_argv, Handshake};
pub use watchdog::Watchdog;
