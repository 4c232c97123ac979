//! Error types for device-link operations

use thiserror::Error;

/// Result type alias for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur while talking to an access device
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The command did not finish in time
    #[error("Device command '{command}' timed out after {millis} ms")]
    Timeout { command: &'static str, millis: u64 },

    /// Could not reach the device
    #[error("Device connection failed: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The device rejected the command
    #[error("Device command '{command}' failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },

    /// No secret with that name exists on the device
    #[error("Secret not found: {name}")]
    SecretNotFound { name: String },

    /// Failed to parse a device response
    #[error("Unexpected device response: {message}")]
    ParseError { message: String },
}

impl DeviceError {
    /// Create a Connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a Connection error with source
    pub fn connection_with_source(message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a Command error
    pub fn command(command: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            command,
            message: message.into(),
        }
    }

    /// Whether a later run might succeed without operator action
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connection { .. })
    }
}
