//! Error types for billing-engine

use device_link::DeviceError;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while running billing operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Ledger read or write failed
    #[error("Ledger error: {0}")]
    Ledger(#[from] netbill_core::Error),

    /// Device command failed
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Tenant settings are missing or inconsistent
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// No customer with that username in scope
    #[error("Customer not found: {username}")]
    CustomerNotFound { username: String },

    /// The device has no secret for the customer
    #[error("Secret not found on device: {username}")]
    SecretNotFound { username: String },

    /// No payment matches the reference
    #[error("Payment not found: {reference}")]
    PaymentNotFound { reference: String },

    /// A gateway notification carried a signature that does not match
    #[error("Invalid signature for order {order_id}")]
    SignatureMismatch { order_id: String },

    /// Request rejected before any work was done
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Payment gateway request failed
    #[error("Payment gateway error: {message}")]
    Gateway {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },
}

impl EngineError {
    /// Create a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an InvalidInput error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a Gateway error
    pub fn gateway(message: impl Into<String>) -> Self {
        Self::Gateway {
            message: message.into(),
            source: None,
        }
    }

    /// Create a Gateway error with source
    pub fn gateway_with_source(message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Gateway {
            message: message.into(),
            source: Some(source),
        }
    }
}
