//! Error handling for the vigil control plane

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Control channel error (handshake, framing, closed peer)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Worker process error (spawn/stop protocol)
    #[error("Worker error: {0}")]
    Worker(String),

    /// Parse error (log rows, wire frames)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Notification dispatch error
    #[error("Notification error: {0}")]
    Notification(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
