//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering request decoding and response encoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Request errors
    /// The action verb is not one the engine exposes.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// A parameter had a value that could not be interpreted.
    #[error("invalid value for parameter `{name}`: {value}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// The rejected raw value.
        value: String,
    },

    /// A binary payload was not valid base64.
    #[error("invalid base64 payload: {0}")]
    InvalidEncoding(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

impl From<base64::DecodeError> for ProtocolError {
    fn from(err: base64::DecodeError) -> Self {
        ProtocolError::InvalidEncoding(err.to_string())
    }
}
