//! Delimiter-framed REPL bridge: a persistent rhai engine fed one
//! multi-line submission at a time, with optional combined stdout/stderr
//! capture and one status record emitted per submission.

mod bridge;
mod error;
mod submission;

pub use bridge::ReplBridge;
pub use error::ReplError;
pub use submission::{Submission, DELIMITER, DELIMITER_TAIL};
