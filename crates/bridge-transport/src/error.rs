use thiserror::Error;

/// Errors surfaced by [`crate::FramedTransport`].
///
/// Variant names mirror the error-kind taxonomy of the framed-transport
/// contract: a value that cannot be represented as JSON, an end-of-stream
/// on the read half, a bounded wait that elapsed, and a non-blocking path
/// that could not complete immediately.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("value is not JSON-serializable: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("transport is closed")]
    Closed,
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("operation would block")]
    WouldBlock,
    #[error("line exceeded maximum size of {max_bytes} bytes")]
    LineTooLong { max_bytes: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
