//! Error types for transport operations.

use thiserror::Error;

/// Errors surfaced by the transport to the host pipeline.
///
/// Address and configuration failures are fatal and raised at construction
/// time. `BackendUnavailable` is per-call; the caller owns the retry policy.
/// Cooperative cancellation is never reported through this type: a cancelled
/// operation completes with its neutral "nothing done" result instead.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Malformed queue address '{uri}': {message}")]
    MalformedAddress { uri: String, message: String },

    #[error("No queue configuration registered under name '{name}'")]
    UnknownConfiguration { name: String },

    #[error("Backend call '{operation}' failed: {message}")]
    BackendUnavailable { operation: String, message: String },

    #[error("Message '{message_id}' does not carry a base64 payload: {message}")]
    MalformedPayload { message_id: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl TransportError {
    /// Check if error is transient and worth retrying by the caller
    pub fn is_transient(&self) -> bool {
        match self {
            Self::MalformedAddress { .. } => false,
            Self::UnknownConfiguration { .. } => false,
            Self::BackendUnavailable { .. } => true,
            Self::MalformedPayload { .. } => false,
            Self::Configuration(_) => false,
        }
    }
}

/// Errors detected when a named configuration is registered.
///
/// Validation happens once, at registration time, never per lookup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Configuration name must not be empty")]
    EmptyName,

    #[error("Configuration '{name}' must set exactly one of connection string or storage account")]
    CredentialRequired { name: String },

    #[error("Configuration '{name}' sets both a connection string and a storage account")]
    CredentialAmbiguous { name: String },

    #[error("Invalid configuration '{name}': {message}")]
    Invalid { name: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
