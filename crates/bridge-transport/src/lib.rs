//! Newline-delimited JSON framed transport over a pair of inherited byte
//! streams, plus the status-channel and command-message wire shapes shared
//! by the rest of the bridge.

mod error;
mod line_reader;
mod message;
mod transport;

#[cfg(unix)]
pub mod unix;

pub use error::TransportError;
pub use line_reader::BufferedLineReader;
pub use message::{FramedMessage, StatusRecord};
pub use transport::{FramedTransport, MAX_LINE_BYTES};
