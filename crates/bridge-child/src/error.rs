use thiserror::Error;

use bridge_loader::LoaderError;
use bridge_runtime::HandshakeError;

/// Top-level failure of the child process, before the dispatch loop (if
/// any) takes over. Every variant here is fatal: the process reports what
/// it can on the status channel, if it has one open yet, and exits
/// non-zero.
#[derive(Debug, Error)]
pub enum ChildError {
    #[error("host handshake error: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("failed to read program bundle: {0}")]
    ReadBundle(#[source] std::io::Error),
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error("failed to attach to inherited descriptor: {0}")]
    Transport(#[from] bridge_transport::TransportError),
    #[error("this platform's pipe-descriptor wiring is not implemented")]
    Unsupported,
}
