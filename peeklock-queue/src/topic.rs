//! Topic channel with durable subscriptions.

use crate::broker::{BrokerClient, BrokeredMessage, ReceiveOptions, SubscriptionInfo};
use crate::delay::DelayResolver;
use crate::error::{QueueError, QueueResult};
use crate::job::{LeasedMessage, MessageSource};
use crate::payload::Payload;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Publish/subscribe channel over named topics.
#[derive(Clone)]
pub struct TopicChannel {
    broker: Arc<dyn BrokerClient>,
    topics: Vec<String>,
    receive_options: ReceiveOptions,
    delays: DelayResolver,
}

impl fmt::Debug for TopicChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicChannel")
            .field("topics", &self.topics)
            .field("receive_options", &self.receive_options)
            .finish()
    }
}

impl TopicChannel {
    /// Create a channel with no configured topics.
    pub fn new(broker: Arc<dyn BrokerClient>) -> Self {
        Self {
            broker,
            topics: Vec::new(),
            receive_options: ReceiveOptions::peek_lock(),
            delays: DelayResolver::new(),
        }
    }

    /// Attach the configured topic list.
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        info!(topics = ?self.topics, "Topic channel ready");
        self
    }

    /// Resolver handed to leases from this channel.
    pub fn with_delay_resolver(mut self, delays: DelayResolver) -> Self {
        self.delays = delays;
        self
    }

    /// Set the server wait for subscription receives.
    pub fn with_receive_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.receive_options = self.receive_options.with_timeout(timeout);
        self
    }

    /// Configured topics.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Publish a payload to a topic.
    ///
    /// Structured values go out as canonical JSON; text and bytes are sent as is.
    pub async fn publish(&self, topic: &str, payload: impl Into<Payload>) -> QueueResult<()> {
        require_name("topic", topic)?;
        let body = payload.into().into_bytes()?;
        debug!(topic = topic, bytes = body.len(), "Publishing topic message");
        self.broker
            .send_to_topic(topic, BrokeredMessage::new(body))
            .await
            .map_err(|source| QueueError::SendFailure {
                entity: topic.to_string(),
                source,
            })
    }

    /// Publish any serializable value as canonical JSON.
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        value: &T,
    ) -> QueueResult<()> {
        self.publish(topic, Payload::json(value)?).await
    }

    /// Create the subscription unless the broker already has it.
    pub async fn ensure_subscription(&self, topic: &str, subscription: &str) -> QueueResult<()> {
        require_name("topic", topic)?;
        require_name("subscription", subscription)?;

        match self
            .broker
            .create_subscription(topic, &SubscriptionInfo::new(subscription))
            .await
        {
            Ok(()) => {
                info!(topic = topic, subscription = subscription, "Created subscription");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(source) => Err(QueueError::SubscriptionCreateFailure {
                topic: topic.to_string(),
                subscription: subscription.to_string(),
                source,
            }),
        }
    }

    /// Ensure the subscription, then receive at most one message in peek-lock mode.
    pub async fn subscribe(
        &self,
        topic: &str,
        subscription: &str,
    ) -> QueueResult<Option<LeasedMessage>> {
        self.ensure_subscription(topic, subscription).await?;

        let source = MessageSource::Subscription {
            topic: topic.to_string(),
            subscription: subscription.to_string(),
        };
        let message = self
            .broker
            .receive_from_subscription(topic, subscription, &self.receive_options)
            .await
            .map_err(|e| QueueError::ReceiveFailure {
                entity: source.to_string(),
                source: e,
            })?;

        Ok(message.map(|message| {
            debug!(
                source = %source,
                message_id = %message.id(),
                attempts = message.delivery_count,
                "Leased subscription message"
            );
            LeasedMessage::new(self.broker.clone(), message, source, self.delays.clone())
        }))
    }
}

fn require_name(kind: &str, name: &str) -> QueueResult<()> {
    if name.is_empty() {
        return Err(QueueError::Configuration(format!("{} name must not be empty", kind)));
    }
    Ok(())
}
