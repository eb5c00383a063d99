//! Error types for queue operations.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors reported by a broker client.
///
/// These are produced by [`BrokerClient`](crate::broker::BrokerClient)
/// implementations and carried unmodified inside [`QueueError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Entity (subscription, queue, topic) already exists
    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    /// Entity or message not found
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// The message lock expired or was never held
    #[error("Message lock lost: {0}")]
    LockLost(String),

    /// Transport-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Other broker error
    #[error("Broker error: {0}")]
    Other(String),
}

impl BrokerError {
    /// Check if this error reports an entity that already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, BrokerError::AlreadyExists(_))
    }
}

/// Queue-specific errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Delay could not be resolved to a deliver-after time
    #[error("Invalid delay: {0}")]
    InvalidDelay(String),

    /// Missing or empty queue/topic configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Sending to a queue or topic failed
    #[error("Failed to send to '{entity}'")]
    SendFailure {
        entity: String,
        #[source]
        source: BrokerError,
    },

    /// Receiving from a queue or subscription failed
    #[error("Failed to receive from '{entity}'")]
    ReceiveFailure {
        entity: String,
        #[source]
        source: BrokerError,
    },

    /// Creating a topic subscription failed
    #[error("Failed to create subscription '{subscription}' on topic '{topic}'")]
    SubscriptionCreateFailure {
        topic: String,
        subscription: String,
        #[source]
        source: BrokerError,
    },

    /// Deleting (acknowledging) a leased message failed
    #[error("Failed to delete message {message_id}")]
    AckFailure {
        message_id: String,
        #[source]
        source: BrokerError,
    },

    /// Releasing (unlocking) a leased message failed
    #[error("Failed to release message {message_id}")]
    ReleaseFailure {
        message_id: String,
        #[source]
        source: BrokerError,
    },

    /// A leased message was deleted or released more than once
    #[error("Message {message_id} was already {previous}")]
    DoubleResolution {
        message_id: String,
        previous: &'static str,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl QueueError {
    /// Check if this error signals misuse of the API rather than a broker fault.
    ///
    /// Callers should treat these as fatal for the worker that raised them.
    pub fn is_programming_error(&self) -> bool {
        matches!(self, QueueError::DoubleResolution { .. })
    }

    /// Get the underlying broker error, if any.
    pub fn broker_error(&self) -> Option<&BrokerError> {
        match self {
            QueueError::SendFailure { source, .. }
            | QueueError::ReceiveFailure { source, .. }
            | QueueError::SubscriptionCreateFailure { source, .. }
            | QueueError::AckFailure { source, .. }
            | QueueError::ReleaseFailure { source, .. } => Some(source),
            _ => None,
        }
    }
}
