//! Backend capability boundary consumed by the queue adapter.

use crate::error::TransportError;
use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;

/// Message record as returned by a backend batch receive.
///
/// `message_text` is the wire payload (base64 text); `pop_receipt` is the
/// single-use lease credential required to delete this specific delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub message_id: String,
    pub message_text: String,
    pub pop_receipt: String,
}

/// Retention requested when submitting a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTtl {
    /// Service default retention
    Default,
    /// Message never expires
    Infinite,
}

/// Errors raised at the backend boundary
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Queue '{queue_name}' not found")]
    QueueNotFound { queue_name: String },

    #[error("Message '{message_id}' not found or pop receipt no longer valid")]
    MessageNotFound { message_id: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Queue service error ({status}): {code} - {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Malformed service response: {message}")]
    MalformedResponse { message: String },
}

impl BackendError {
    /// Check whether this error means the target no longer exists.
    ///
    /// A delete against an expired or superseded pop receipt reports
    /// `MessageNotFound`; the adapter treats that as already resolved.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::MessageNotFound { .. })
    }

    /// Map into the transport error surfaced to the caller
    pub(crate) fn into_transport(self, operation: &str) -> TransportError {
        TransportError::BackendUnavailable {
            operation: operation.to_string(),
            message: self.to_string(),
        }
    }
}

/// Operations the transport consumes from a cloud queue backend.
///
/// One implementation instance is bound to exactly one backend queue. The
/// adapter depends only on this trait, which keeps the core lifecycle logic
/// testable against a deterministic in-memory implementation.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Create the queue when it does not exist yet
    async fn create_if_not_exists(&self) -> Result<(), BackendError>;

    /// Delete the queue when it exists
    async fn delete_if_exists(&self) -> Result<(), BackendError>;

    /// Remove every message from the queue
    async fn clear_messages(&self) -> Result<(), BackendError>;

    /// Approximate number of messages, including currently invisible ones
    async fn approximate_message_count(&self) -> Result<u64, BackendError>;

    /// Submit one message with the requested retention
    async fn send_message(
        &self,
        message_text: &str,
        time_to_live: MessageTtl,
    ) -> Result<(), BackendError>;

    /// Fetch up to `max_messages`, leasing each for the visibility timeout
    async fn receive_messages(
        &self,
        max_messages: u32,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<RawMessage>, BackendError>;

    /// Delete one delivery identified by message id and pop receipt
    async fn delete_message(&self, message_id: &str, pop_receipt: &str)
        -> Result<(), BackendError>;
}
