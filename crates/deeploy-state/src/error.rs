use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Wrong value type at key: {0}")]
    WrongType(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid content address: {0}")]
    InvalidAddress(String),

    #[error("Content integrity check failed for {0}")]
    Integrity(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),
}
