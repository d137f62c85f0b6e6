use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("host bridge error: {0}")]
    BridgeError(String),

    #[error("{method} failed: {message}")]
    RpcError { method: String, message: String },

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;
