use thiserror::Error;

/// Errors in the bootstrap/module-loader path. Every variant here is
/// fatal for the whole child process.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to parse program bundle JSON: {0}")]
    ParseBundle(#[source] serde_json::Error),
    #[error("module `{module}` has invalid base64 source: {source}")]
    DecodeSource {
        module: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("module `{module}` source is not valid UTF-8: {source}")]
    InvalidUtf8 {
        module: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
    #[error("duplicate module name `{0}` in bundle catalog")]
    DuplicateModule(String),
    #[error("module `{0}` not found in bundle catalog and no default resolution applies")]
    UnknownModule(String),
    #[error("failed to compile module `{module}`: {message}")]
    Compile { module: String, message: String },
    #[error("failed to evaluate module `{module}`: {message}")]
    Eval { module: String, message: String },
}
