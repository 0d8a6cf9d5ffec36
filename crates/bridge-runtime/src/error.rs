use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("missing argv[{index}]: expected {what}")]
    Missing { index: usize, what: &'static str },
    #[error("argv[{index}] (`{value}`) is not a valid {what}: {source}")]
    Invalid {
        index: usize,
        value: String,
        what: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
}
