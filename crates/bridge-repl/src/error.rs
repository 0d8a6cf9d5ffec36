use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplError {
    #[error(transparent)]
    Transport(#[from] bridge_transport::TransportError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
