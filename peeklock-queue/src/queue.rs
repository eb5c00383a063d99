//! Queue channel over a broker client.

use crate::broker::{BrokerClient, BrokeredMessage, QueueDepth, ReceiveOptions};
use crate::delay::{Delay, DelayResolver};
use crate::error::{QueueError, QueueResult};
use crate::job::{LeasedMessage, MessageSource};
use crate::payload::{JobData, JobEnvelope, Payload};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Send/receive channel bound to a default queue.
///
/// Cloning is cheap; clones share the broker client.
#[derive(Clone)]
pub struct QueueChannel {
    broker: Arc<dyn BrokerClient>,
    default_queue: String,
    receive_options: ReceiveOptions,
    delays: DelayResolver,
}

impl fmt::Debug for QueueChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueChannel")
            .field("default_queue", &self.default_queue)
            .field("receive_options", &self.receive_options)
            .field("delays", &self.delays)
            .finish()
    }
}

impl QueueChannel {
    /// Create a channel with the given default queue.
    pub fn new(broker: Arc<dyn BrokerClient>, default_queue: impl Into<String>) -> Self {
        let default_queue = default_queue.into();
        info!(default_queue = %default_queue, "Queue channel ready");
        Self {
            broker,
            default_queue,
            receive_options: ReceiveOptions::peek_lock(),
            delays: DelayResolver::new(),
        }
    }

    /// Use the given resolver for delays (and for leases this channel hands out).
    pub fn with_delay_resolver(mut self, delays: DelayResolver) -> Self {
        self.delays = delays;
        self
    }

    /// Set the server wait for receives. The receive mode stays peek-lock.
    pub fn with_receive_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.receive_options = self.receive_options.with_timeout(timeout);
        self
    }

    /// Default queue name.
    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    /// Resolve an optional queue name against the default.
    pub fn queue_name<'a>(&'a self, queue: Option<&'a str>) -> QueueResult<&'a str> {
        match queue {
            Some(name) if !name.is_empty() => Ok(name),
            _ if !self.default_queue.is_empty() => Ok(&self.default_queue),
            _ => Err(QueueError::Configuration(
                "no queue name given and no default queue configured".to_string(),
            )),
        }
    }

    /// Send a payload for immediate delivery.
    pub async fn enqueue(
        &self,
        payload: impl Into<Payload>,
        queue: Option<&str>,
    ) -> QueueResult<()> {
        let queue = self.queue_name(queue)?;
        let message = BrokeredMessage::new(payload.into().into_bytes()?);
        self.send(queue, message).await
    }

    /// Send a payload that becomes deliverable after `delay`.
    pub async fn enqueue_after(
        &self,
        delay: impl Into<Delay>,
        payload: impl Into<Payload>,
        queue: Option<&str>,
    ) -> QueueResult<()> {
        let queue = self.queue_name(queue)?;
        let deliver_after = self.delays.resolve(delay)?;
        let message = BrokeredMessage::new(payload.into().into_bytes()?)
            .with_scheduled_enqueue_time(deliver_after);
        self.send(queue, message).await
    }

    /// Send a job envelope for `job` with `data`.
    pub async fn push(
        &self,
        job: impl Into<String>,
        data: JobData,
        queue: Option<&str>,
    ) -> QueueResult<()> {
        let envelope = JobEnvelope::new(job, data);
        self.push_envelope(&envelope, queue).await
    }

    /// Send a prepared job envelope.
    pub async fn push_envelope(
        &self,
        envelope: &JobEnvelope,
        queue: Option<&str>,
    ) -> QueueResult<()> {
        self.enqueue(envelope.to_payload()?, queue).await
    }

    /// Send a job envelope that becomes deliverable after `delay`.
    pub async fn later(
        &self,
        delay: impl Into<Delay>,
        job: impl Into<String>,
        data: JobData,
        queue: Option<&str>,
    ) -> QueueResult<()> {
        let envelope = JobEnvelope::new(job, data);
        self.enqueue_after(delay, envelope.to_payload()?, queue).await
    }

    /// Receive one message in peek-lock mode.
    ///
    /// Returns `None` when nothing is deliverable. Makes a single attempt.
    pub async fn receive(&self, queue: Option<&str>) -> QueueResult<Option<LeasedMessage>> {
        let queue = self.queue_name(queue)?;
        let message = self
            .broker
            .receive_from_queue(queue, &self.receive_options)
            .await
            .map_err(|source| QueueError::ReceiveFailure {
                entity: queue.to_string(),
                source,
            })?;

        Ok(message.map(|message| {
            debug!(
                queue = queue,
                message_id = %message.id(),
                attempts = message.delivery_count,
                "Leased message"
            );
            LeasedMessage::new(
                self.broker.clone(),
                message,
                MessageSource::Queue(queue.to_string()),
                self.delays.clone(),
            )
        }))
    }

    /// Queue depth as reported by the broker.
    ///
    /// Brokers that cannot count report [`QueueDepth::Unsupported`].
    pub async fn size(&self, queue: Option<&str>) -> QueueResult<QueueDepth> {
        let queue = self.queue_name(queue)?;
        self.broker
            .queue_depth(queue)
            .await
            .map_err(|source| QueueError::ReceiveFailure {
                entity: queue.to_string(),
                source,
            })
    }

    async fn send(&self, queue: &str, message: BrokeredMessage) -> QueueResult<()> {
        debug!(
            queue = queue,
            bytes = message.body.len(),
            scheduled = ?message.scheduled_enqueue_time_utc,
            "Sending queue message"
        );
        self.broker
            .send_to_queue(queue, message)
            .await
            .map_err(|source| QueueError::SendFailure {
                entity: queue.to_string(),
                source,
            })
    }
}
