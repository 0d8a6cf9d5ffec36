use thiserror::Error;

/// Errors surfaced by [`crate::NamedSemaphore`]. All variants map to the
/// framed-transport contract's `OSKind`: a syscall against the named
/// kernel object failed.
#[derive(Debug, Error)]
pub enum SemaphoreError {
    #[error("semaphore name must not contain interior NUL bytes")]
    InvalidName,
    #[error("failed to open semaphore `{name}`: {source}")]
    Open {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to acquire semaphore `{name}`: {source}")]
    Acquire {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to release semaphore `{name}`: {source}")]
    Release {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
