//! Broker client capability and message model.
//!
//! The channels never talk to a broker directly. They are handed an
//! `Arc<dyn BrokerClient>` built by the caller (an SDK wrapper, the
//! [`InMemoryBroker`](crate::memory::InMemoryBroker), or a test double).
//! Implementations must be safe to share between concurrent callers.

use crate::error::BrokerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A message as stored by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokeredMessage {
    /// Message body
    pub body: Vec<u8>,

    /// Message identifier (assigned by the broker when not set)
    pub message_id: Option<String>,

    /// Content type of the body
    pub content_type: Option<String>,

    /// Custom application properties
    pub properties: HashMap<String, String>,

    /// Do not deliver before this time
    pub scheduled_enqueue_time_utc: Option<DateTime<Utc>>,

    /// Number of times the broker has delivered this message (set by the broker)
    pub delivery_count: u32,

    /// Peek-lock token (set by the broker on receive)
    pub lock_token: Option<String>,

    /// Lock expiry (set by the broker on receive)
    pub locked_until_utc: Option<DateTime<Utc>>,

    /// Enqueue sequence number (set by the broker)
    pub sequence_number: Option<u64>,

    /// When the broker accepted the message (set by the broker)
    pub enqueued_time_utc: Option<DateTime<Utc>>,
}

impl BrokeredMessage {
    /// Create a message with the given body.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            message_id: None,
            content_type: None,
            properties: HashMap::new(),
            scheduled_enqueue_time_utc: None,
            delivery_count: 0,
            lock_token: None,
            locked_until_utc: None,
            sequence_number: None,
            enqueued_time_utc: None,
        }
    }

    /// Set the message id.
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add a custom property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Schedule delivery.
    pub fn with_scheduled_enqueue_time(mut self, time: DateTime<Utc>) -> Self {
        self.scheduled_enqueue_time_utc = Some(time);
        self
    }

    /// Re-stamp the scheduled delivery time.
    pub fn set_scheduled_enqueue_time(&mut self, time: DateTime<Utc>) {
        self.scheduled_enqueue_time_utc = Some(time);
    }

    /// Message id, or an empty string when the broker has not assigned one.
    pub fn id(&self) -> &str {
        self.message_id.as_deref().unwrap_or_default()
    }
}

/// How a receive treats the delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReceiveMode {
    /// Lock the message until it is deleted, unlocked, or the lock expires
    #[default]
    PeekLock,
    /// Remove the message as part of delivery
    ReceiveAndDelete,
}

/// Options for a single receive call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Receive mode
    pub mode: ReceiveMode,

    /// Server-side wait before reporting no message (broker default when unset)
    pub timeout: Option<Duration>,
}

impl ReceiveOptions {
    /// Peek-lock receive with the broker's default wait.
    pub fn peek_lock() -> Self {
        Self {
            mode: ReceiveMode::PeekLock,
            timeout: None,
        }
    }

    /// Receive-and-delete with the broker's default wait.
    pub fn receive_and_delete() -> Self {
        Self {
            mode: ReceiveMode::ReceiveAndDelete,
            timeout: None,
        }
    }

    /// Set the server wait.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check if this is a peek-lock receive.
    pub fn is_peek_lock(&self) -> bool {
        self.mode == ReceiveMode::PeekLock
    }
}

/// Description of a topic subscription to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    /// Subscription name
    pub name: String,

    /// Default time-to-live for messages in the subscription
    pub default_message_ttl: Option<Duration>,

    /// Peek-lock duration
    pub lock_duration: Option<Duration>,
}

impl SubscriptionInfo {
    /// Create a subscription description with broker defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_message_ttl: None,
            lock_duration: None,
        }
    }

    /// Set the default message time-to-live.
    pub fn with_default_message_ttl(mut self, ttl: Duration) -> Self {
        self.default_message_ttl = Some(ttl);
        self
    }

    /// Set the lock duration.
    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = Some(lock_duration);
        self
    }
}

/// Answer to a queue depth query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueDepth {
    /// The broker reported this many deliverable messages
    Known(u64),
    /// The broker cannot report depth
    Unsupported,
}

impl QueueDepth {
    /// Depth, if the broker reported one.
    pub fn known(self) -> Option<u64> {
        match self {
            QueueDepth::Known(depth) => Some(depth),
            QueueDepth::Unsupported => None,
        }
    }

    /// Check if the broker cannot report depth.
    pub fn is_unsupported(self) -> bool {
        self == QueueDepth::Unsupported
    }
}

/// Operations a broker client must provide.
///
/// Each method is one request/response exchange with the broker. Retries,
/// authentication and lock renewal are the implementation's business.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Send a message to a queue.
    async fn send_to_queue(&self, queue: &str, message: BrokeredMessage)
    -> Result<(), BrokerError>;

    /// Receive at most one message from a queue.
    async fn receive_from_queue(
        &self,
        queue: &str,
        options: &ReceiveOptions,
    ) -> Result<Option<BrokeredMessage>, BrokerError>;

    /// Delete a peek-locked message.
    async fn delete_message(&self, message: &BrokeredMessage) -> Result<(), BrokerError>;

    /// Unlock a peek-locked message so it can be delivered again.
    async fn unlock_message(&self, message: &BrokeredMessage) -> Result<(), BrokerError>;

    /// Send a message to a topic.
    async fn send_to_topic(&self, topic: &str, message: BrokeredMessage)
    -> Result<(), BrokerError>;

    /// Receive at most one message from a topic subscription.
    async fn receive_from_subscription(
        &self,
        topic: &str,
        subscription: &str,
        options: &ReceiveOptions,
    ) -> Result<Option<BrokeredMessage>, BrokerError>;

    /// Create a topic subscription.
    ///
    /// Returns [`BrokerError::AlreadyExists`] when the subscription is present.
    async fn create_subscription(
        &self,
        topic: &str,
        subscription: &SubscriptionInfo,
    ) -> Result<(), BrokerError>;

    /// Number of deliverable messages in a queue.
    async fn queue_depth(&self, _queue: &str) -> Result<QueueDepth, BrokerError> {
        Ok(QueueDepth::Unsupported)
    }
}
