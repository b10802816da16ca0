#![forbid(unsafe_code)]

/// Errors produced by the Ulriksdal streaming security library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("malformed event stream: {0}")]
    MalformedInput(String),

    #[error("key resolution failed: {0}")]
    KeyResolution(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("transform failed: {0}")]
    TransformFailure(String),

    #[error("processor chain protocol violation: {0}")]
    ChainProtocol(String),

    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
