//! Leased messages and their resolution.

use crate::broker::{BrokerClient, BrokeredMessage};
use crate::delay::{Delay, DelayResolver};
use crate::error::{QueueError, QueueResult};
use crate::payload::{JobEnvelope, decode_json};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a leased message was received from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSource {
    /// A queue
    Queue(String),
    /// A topic subscription
    Subscription {
        /// Topic name
        topic: String,
        /// Subscription name
        subscription: String,
    },
}

impl fmt::Display for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageSource::Queue(queue) => write!(f, "{}", queue),
            MessageSource::Subscription {
                topic,
                subscription,
            } => write!(f, "{}/subscriptions/{}", topic, subscription),
        }
    }
}

/// Resolution state of a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Lock held, not yet resolved
    Leased,
    /// Deleted from the broker
    Deleted,
    /// Released back to the broker
    Released,
}

impl LeaseState {
    fn as_str(self) -> &'static str {
        match self {
            LeaseState::Leased => "leased",
            LeaseState::Deleted => "deleted",
            LeaseState::Released => "released",
        }
    }
}

/// A received message whose peek-lock is held by this process.
///
/// Exactly one of [`delete`](Self::delete) or [`release`](Self::release)
/// may be called. The state flips before the broker is contacted, so a
/// failed call still consumes the lease.
pub struct LeasedMessage {
    broker: Arc<dyn BrokerClient>,
    message: BrokeredMessage,
    source: MessageSource,
    raw: Vec<u8>,
    delays: DelayResolver,
    state: LeaseState,
}

impl fmt::Debug for LeasedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeasedMessage")
            .field("message_id", &self.message.id())
            .field("source", &self.source)
            .field("attempts", &self.message.delivery_count)
            .field("state", &self.state)
            .finish()
    }
}

impl LeasedMessage {
    /// Wrap a message received in peek-lock mode.
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        message: BrokeredMessage,
        source: MessageSource,
        delays: DelayResolver,
    ) -> Self {
        let raw = message.body.clone();
        Self {
            broker,
            message,
            source,
            raw,
            delays,
            state: LeaseState::Leased,
        }
    }

    /// Delete the message from the broker.
    pub async fn delete(&mut self) -> QueueResult<()> {
        self.resolve(LeaseState::Deleted)?;
        debug!(message_id = %self.job_id(), source = %self.source, "Deleting message");

        self.broker
            .delete_message(&self.message)
            .await
            .map_err(|source| {
                warn!(message_id = %self.message.id(), error = %source, "Delete failed");
                QueueError::AckFailure {
                    message_id: self.message.id().to_string(),
                    source,
                }
            })
    }

    /// Release the message back to the broker.
    ///
    /// The scheduled enqueue time is re-stamped from `delay` before the
    /// message is unlocked; a zero delay makes it deliverable right away.
    pub async fn release(&mut self, delay: impl Into<Delay>) -> QueueResult<()> {
        if self.state != LeaseState::Leased {
            return Err(self.double_resolution());
        }
        let deliver_after = self.delays.resolve(delay)?;
        self.resolve(LeaseState::Released)?;
        self.message.set_scheduled_enqueue_time(deliver_after);
        debug!(
            message_id = %self.job_id(),
            source = %self.source,
            deliver_after = %deliver_after,
            "Releasing message"
        );

        self.broker
            .unlock_message(&self.message)
            .await
            .map_err(|source| {
                warn!(message_id = %self.message.id(), error = %source, "Release failed");
                QueueError::ReleaseFailure {
                    message_id: self.message.id().to_string(),
                    source,
                }
            })
    }

    /// Release the message for immediate redelivery.
    pub async fn release_now(&mut self) -> QueueResult<()> {
        self.release(Delay::NONE).await
    }

    fn resolve(&mut self, next: LeaseState) -> QueueResult<()> {
        if self.state != LeaseState::Leased {
            return Err(self.double_resolution());
        }
        self.state = next;
        Ok(())
    }

    fn double_resolution(&self) -> QueueError {
        QueueError::DoubleResolution {
            message_id: self.message.id().to_string(),
            previous: self.state.as_str(),
        }
    }

    /// Number of times the broker has delivered this message.
    pub fn attempts(&self) -> u32 {
        self.message.delivery_count
    }

    /// Broker message id.
    pub fn job_id(&self) -> &str {
        self.message.id()
    }

    /// Body bytes as they were at receive time.
    pub fn raw_payload(&self) -> &[u8] {
        &self.raw
    }

    /// Body decoded as JSON.
    pub fn payload_json(&self) -> QueueResult<serde_json::Value> {
        decode_json(&self.raw)
    }

    /// Body decoded as a job envelope written by `QueueChannel::push`.
    pub fn envelope(&self) -> QueueResult<JobEnvelope> {
        decode_json(&self.raw)
    }

    /// Where the message came from.
    pub fn source(&self) -> &MessageSource {
        &self.source
    }

    /// Queue name, when received from a queue.
    pub fn queue(&self) -> Option<&str> {
        match &self.source {
            MessageSource::Queue(queue) => Some(queue),
            MessageSource::Subscription { .. } => None,
        }
    }

    /// Underlying broker message.
    pub fn message(&self) -> &BrokeredMessage {
        &self.message
    }

    /// Broker client this lease resolves against.
    pub fn broker(&self) -> &Arc<dyn BrokerClient> {
        &self.broker
    }

    /// Current resolution state.
    pub fn state(&self) -> LeaseState {
        self.state
    }

    /// Check if the message was deleted.
    pub fn is_deleted(&self) -> bool {
        self.state == LeaseState::Deleted
    }

    /// Check if the message was released.
    pub fn is_released(&self) -> bool {
        self.state == LeaseState::Released
    }

    /// Check if the message was deleted or released.
    pub fn is_deleted_or_released(&self) -> bool {
        self.state != LeaseState::Leased
    }
}
