//! Error types for extensions.

use thiserror::Error;

/// Result type alias for extension entry points.
pub type Result<T> = std::result::Result<T, ExtensionError>;

/// Error returned by an extension entry point.
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("{0}")]
    Message(String),

    #[error("missing option '{0}'")]
    MissingOption(String),

    #[error("invalid option '{name}': {reason}")]
    InvalidOption { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ExtensionError {
    /// Creates an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}
