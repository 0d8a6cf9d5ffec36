use std::time::Duration;

use thiserror::Error;

/// Errors from the outbound half of `CommandServer` (`request`/`async_request`).
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to serialize request: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("command/response channel closed")]
    ChannelClosed,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// The shape of a failed handler invocation, carried back to the peer as
/// `{error, traceback, request_id}`.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub exception: String,
    pub message: String,
    pub traceback: String,
}

impl HandlerError {
    pub fn new(exception: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception: exception.into(),
            message: message.into(),
            traceback: String::new(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.exception, self.message)
    }
}
