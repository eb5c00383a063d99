//! In-memory broker for tests and single-process development.
//!
//! Behaves like a peek-lock broker: scheduled messages stay hidden until
//! their enqueue time, received messages stay hidden until deleted,
//! unlocked, or their lock expires, and every delivery bumps the delivery
//! count. Topic sends fan out to the subscriptions that exist at send time.

use crate::broker::{BrokerClient, BrokeredMessage, QueueDepth, ReceiveOptions, SubscriptionInfo};
use crate::delay::{Clock, SystemClock};
use crate::error::BrokerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Default peek-lock duration.
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entity {
    Queue(String),
    Subscription { topic: String, name: String },
}

#[derive(Debug)]
struct Lock {
    token: String,
    until: DateTime<Utc>,
}

#[derive(Debug)]
struct Stored {
    message: BrokeredMessage,
    lock: Option<Lock>,
}

impl Stored {
    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        let scheduled = self
            .message
            .scheduled_enqueue_time_utc
            .is_none_or(|at| at <= now);
        let unlocked = self.lock.as_ref().is_none_or(|lock| lock.until <= now);
        scheduled && unlocked
    }

    fn holds_lock(&self, token: &str) -> bool {
        self.lock.as_ref().is_some_and(|lock| lock.token == token)
    }
}

#[derive(Debug)]
struct Subscription {
    lock_duration: Option<Duration>,
    messages: VecDeque<Stored>,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, VecDeque<Stored>>,
    topics: HashMap<String, HashMap<String, Subscription>>,
    locks: HashMap<String, Entity>,
    next_sequence: u64,
}

impl State {
    fn stamp(&mut self, mut message: BrokeredMessage, now: DateTime<Utc>) -> BrokeredMessage {
        self.next_sequence += 1;
        if message.message_id.is_none() {
            message.message_id = Some(Uuid::new_v4().to_string());
        }
        message.sequence_number = Some(self.next_sequence);
        message.enqueued_time_utc = Some(now);
        message.delivery_count = 0;
        message.lock_token = None;
        message.locked_until_utc = None;
        message
    }

    fn messages_mut(&mut self, entity: &Entity) -> Option<&mut VecDeque<Stored>> {
        match entity {
            Entity::Queue(name) => self.queues.get_mut(name),
            Entity::Subscription { topic, name } => self
                .topics
                .get_mut(topic)
                .and_then(|subs| subs.get_mut(name))
                .map(|sub| &mut sub.messages),
        }
    }

    fn receive(
        &mut self,
        entity: Entity,
        options: &ReceiveOptions,
        lock_duration: Duration,
        now: DateTime<Utc>,
    ) -> Option<BrokeredMessage> {
        let messages = self.messages_mut(&entity)?;
        let index = messages.iter().position(|stored| stored.is_visible(now))?;

        if !options.is_peek_lock() {
            let mut stored = messages.remove(index)?;
            stored.message.delivery_count += 1;
            if let Some(old) = stored.lock.take() {
                self.locks.remove(&old.token);
            }
            return Some(stored.message);
        }

        let stored = &mut messages[index];
        let until = lock_deadline(now, lock_duration);
        let token = Uuid::new_v4().to_string();
        let stale = stored.lock.replace(Lock {
            token: token.clone(),
            until,
        });

        stored.message.delivery_count += 1;
        let mut delivered = stored.message.clone();
        delivered.lock_token = Some(token.clone());
        delivered.locked_until_utc = Some(until);

        if let Some(stale) = stale {
            self.locks.remove(&stale.token);
        }
        self.locks.insert(token, entity);
        Some(delivered)
    }

    /// Find the stored message holding a live lock for `message`.
    fn locked_position(
        &mut self,
        message: &BrokeredMessage,
        now: DateTime<Utc>,
    ) -> Result<(Entity, usize), BrokerError> {
        let token = message.lock_token.as_deref().ok_or_else(|| {
            BrokerError::LockLost(format!("message {} holds no lock", message.id()))
        })?;
        let entity = self
            .locks
            .get(token)
            .cloned()
            .ok_or_else(|| BrokerError::LockLost(format!("unknown lock token {}", token)))?;

        let position = self.messages_mut(&entity).and_then(|messages| {
            messages
                .iter()
                .position(|stored| stored.holds_lock(token))
                .filter(|&index| {
                    messages[index]
                        .lock
                        .as_ref()
                        .is_some_and(|lock| lock.until > now)
                })
        });

        match position {
            Some(index) => Ok((entity, index)),
            None => {
                self.locks.remove(token);
                Err(BrokerError::LockLost(format!(
                    "lock for message {} expired",
                    message.id()
                )))
            }
        }
    }
}

/// Lock expiry for a lock taken at `now`. Saturates at the latest
/// representable time, so an oversized lock never expires early.
fn lock_deadline(now: DateTime<Utc>, lock_duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lock_duration)
        .ok()
        .and_then(|interval| now.checked_add_signed(interval))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Broker that keeps queues and topic subscriptions in process memory.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    lock_duration: Duration,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create an empty broker on the system clock.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock: Arc::new(SystemClock),
            lock_duration: DEFAULT_LOCK_DURATION,
        }
    }

    /// Read time from the given clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the default peek-lock duration.
    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    /// Create a queue if it does not exist. Sending also creates queues.
    pub fn create_queue(&self, queue: &str) {
        self.state.lock().queues.entry(queue.to_string()).or_default();
    }

    /// Names of the subscriptions on a topic, sorted.
    pub fn subscriptions(&self, topic: &str) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<String> = state
            .topics
            .get(topic)
            .map(|subs| subs.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Messages stored in a queue, including scheduled and locked ones.
    pub fn stored_count(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Messages stored in a subscription, including scheduled and locked ones.
    pub fn stored_in_subscription(&self, topic: &str, subscription: &str) -> usize {
        self.state
            .lock()
            .topics
            .get(topic)
            .and_then(|subs| subs.get(subscription))
            .map_or(0, |sub| sub.messages.len())
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn send_to_queue(
        &self,
        queue: &str,
        message: BrokeredMessage,
    ) -> Result<(), BrokerError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let message = state.stamp(message, now);
        debug!(queue = queue, message_id = %message.id(), "Stored queue message");
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Stored {
                message,
                lock: None,
            });
        Ok(())
    }

    async fn receive_from_queue(
        &self,
        queue: &str,
        options: &ReceiveOptions,
    ) -> Result<Option<BrokeredMessage>, BrokerError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        Ok(state.receive(
            Entity::Queue(queue.to_string()),
            options,
            self.lock_duration,
            now,
        ))
    }

    async fn delete_message(&self, message: &BrokeredMessage) -> Result<(), BrokerError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let (entity, index) = state.locked_position(message, now)?;
        if let Some(token) = message.lock_token.as_deref() {
            state.locks.remove(token);
        }
        if let Some(messages) = state.messages_mut(&entity) {
            messages.remove(index);
        }
        debug!(message_id = %message.id(), "Deleted message");
        Ok(())
    }

    async fn unlock_message(&self, message: &BrokeredMessage) -> Result<(), BrokerError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let (entity, index) = state.locked_position(message, now)?;
        if let Some(token) = message.lock_token.as_deref() {
            state.locks.remove(token);
        }
        if let Some(stored) = state
            .messages_mut(&entity)
            .and_then(|messages| messages.get_mut(index))
        {
            stored.lock = None;
            stored.message.scheduled_enqueue_time_utc = message.scheduled_enqueue_time_utc;
        }
        debug!(
            message_id = %message.id(),
            scheduled = ?message.scheduled_enqueue_time_utc,
            "Unlocked message"
        );
        Ok(())
    }

    async fn send_to_topic(
        &self,
        topic: &str,
        message: BrokeredMessage,
    ) -> Result<(), BrokerError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let message = state.stamp(message, now);
        let subscriptions = state.topics.entry(topic.to_string()).or_default();
        debug!(
            topic = topic,
            message_id = %message.id(),
            subscriptions = subscriptions.len(),
            "Fanned out topic message"
        );
        for subscription in subscriptions.values_mut() {
            subscription.messages.push_back(Stored {
                message: message.clone(),
                lock: None,
            });
        }
        Ok(())
    }

    async fn receive_from_subscription(
        &self,
        topic: &str,
        subscription: &str,
        options: &ReceiveOptions,
    ) -> Result<Option<BrokeredMessage>, BrokerError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let lock_duration = state
            .topics
            .get(topic)
            .and_then(|subs| subs.get(subscription))
            .map(|sub| sub.lock_duration.unwrap_or(self.lock_duration))
            .ok_or_else(|| {
                BrokerError::NotFound(format!("subscription {}/{}", topic, subscription))
            })?;

        Ok(state.receive(
            Entity::Subscription {
                topic: topic.to_string(),
                name: subscription.to_string(),
            },
            options,
            lock_duration,
            now,
        ))
    }

    async fn create_subscription(
        &self,
        topic: &str,
        subscription: &SubscriptionInfo,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let subscriptions = state.topics.entry(topic.to_string()).or_default();
        if subscriptions.contains_key(&subscription.name) {
            return Err(BrokerError::AlreadyExists(format!(
                "subscription {}/{}",
                topic, subscription.name
            )));
        }
        subscriptions.insert(
            subscription.name.clone(),
            Subscription {
                lock_duration: subscription.lock_duration,
                messages: VecDeque::new(),
            },
        );
        debug!(topic = topic, subscription = %subscription.name, "Created subscription");
        Ok(())
    }

    async fn queue_depth(&self, queue: &str) -> Result<QueueDepth, BrokerError> {
        let now = self.clock.now();
        let state = self.state.lock();
        let depth = state
            .queues
            .get(queue)
            .map_or(0, |messages| messages.iter().filter(|m| m.is_visible(now)).count());
        Ok(QueueDepth::Known(depth as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::ManualClock;

    fn broker() -> (ManualClock, InMemoryBroker) {
        let clock = ManualClock::starting_now();
        let broker = InMemoryBroker::new().with_clock(Arc::new(clock.clone()));
        (clock, broker)
    }

    #[tokio::test]
    async fn test_send_assigns_broker_fields() {
        let (_, broker) = broker();
        broker
            .send_to_queue("q", BrokeredMessage::new("a"))
            .await
            .unwrap();
        broker
            .send_to_queue("q", BrokeredMessage::new("b").with_message_id("custom"))
            .await
            .unwrap();

        let options = ReceiveOptions::peek_lock();
        let first = broker.receive_from_queue("q", &options).await.unwrap().unwrap();
        let second = broker.receive_from_queue("q", &options).await.unwrap().unwrap();

        assert!(!first.id().is_empty());
        assert_eq!(second.id(), "custom");
        assert_eq!(first.sequence_number, Some(1));
        assert_eq!(second.sequence_number, Some(2));
        assert_eq!(first.delivery_count, 1);
        assert!(first.lock_token.is_some());
        assert!(first.locked_until_utc.is_some());
    }

    #[tokio::test]
    async fn test_peek_lock_hides_message_until_lock_expires() {
        let (clock, broker) = broker();
        broker
            .send_to_queue("q", BrokeredMessage::new("job"))
            .await
            .unwrap();

        let options = ReceiveOptions::peek_lock();
        let leased = broker.receive_from_queue("q", &options).await.unwrap().unwrap();
        assert!(broker.receive_from_queue("q", &options).await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(31));
        let again = broker.receive_from_queue("q", &options).await.unwrap().unwrap();
        assert_eq!(again.delivery_count, 2);

        // The first lock is stale now.
        let err = broker.delete_message(&leased).await.unwrap_err();
        assert!(matches!(err, BrokerError::LockLost(_)));
        broker.delete_message(&again).await.unwrap();
        assert_eq!(broker.stored_count("q"), 0);
    }

    #[tokio::test]
    async fn test_unlock_makes_message_visible_and_honours_schedule() {
        let (clock, broker) = broker();
        broker
            .send_to_queue("q", BrokeredMessage::new("job"))
            .await
            .unwrap();

        let options = ReceiveOptions::peek_lock();
        let mut leased = broker.receive_from_queue("q", &options).await.unwrap().unwrap();
        broker.unlock_message(&leased).await.unwrap();
        let mut leased_again = broker.receive_from_queue("q", &options).await.unwrap().unwrap();
        assert_eq!(leased_again.delivery_count, 2);

        leased_again.set_scheduled_enqueue_time(clock.now() + chrono::Duration::seconds(10));
        broker.unlock_message(&leased_again).await.unwrap();
        assert!(broker.receive_from_queue("q", &options).await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(10));
        assert!(broker.receive_from_queue("q", &options).await.unwrap().is_some());

        // Unlocking twice with the same token is rejected.
        leased.lock_token = leased_again.lock_token.clone();
        assert!(broker.unlock_message(&leased).await.is_err());
    }

    #[tokio::test]
    async fn test_scheduled_message_hidden_until_due() {
        let (clock, broker) = broker();
        let due = clock.now() + chrono::Duration::seconds(60);
        broker
            .send_to_queue("q", BrokeredMessage::new("later").with_scheduled_enqueue_time(due))
            .await
            .unwrap();

        let options = ReceiveOptions::peek_lock();
        assert!(broker.receive_from_queue("q", &options).await.unwrap().is_none());
        assert_eq!(broker.queue_depth("q").await.unwrap(), QueueDepth::Known(0));

        clock.set(due);
        assert_eq!(broker.queue_depth("q").await.unwrap(), QueueDepth::Known(1));
        assert!(broker.receive_from_queue("q", &options).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_oversized_lock_durations_keep_message_locked() {
        for lock_duration in [Duration::from_secs(40_000_000_000_000), Duration::MAX] {
            let (clock, broker) = broker();
            let broker = broker.with_lock_duration(lock_duration);
            broker
                .send_to_queue("q", BrokeredMessage::new("held"))
                .await
                .unwrap();

            let options = ReceiveOptions::peek_lock();
            let leased = broker.receive_from_queue("q", &options).await.unwrap().unwrap();
            assert_eq!(leased.locked_until_utc, Some(DateTime::<Utc>::MAX_UTC));
            assert!(broker.receive_from_queue("q", &options).await.unwrap().is_none());

            clock.advance(chrono::Duration::days(365));
            assert!(broker.receive_from_queue("q", &options).await.unwrap().is_none());
            broker.delete_message(&leased).await.unwrap();
            assert_eq!(broker.stored_count("q"), 0);
        }
    }

    #[test]
    fn test_lock_deadline() {
        let now = Utc::now();
        assert_eq!(
            lock_deadline(now, Duration::from_secs(30)),
            now + chrono::Duration::seconds(30)
        );
        assert_eq!(lock_deadline(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[tokio::test]
    async fn test_receive_and_delete_removes_message() {
        let (_, broker) = broker();
        broker
            .send_to_queue("q", BrokeredMessage::new("once"))
            .await
            .unwrap();

        let options = ReceiveOptions::receive_and_delete();
        let message = broker.receive_from_queue("q", &options).await.unwrap().unwrap();
        assert_eq!(message.body, b"once".to_vec());
        assert!(message.lock_token.is_none());
        assert_eq!(broker.stored_count("q"), 0);
    }

    #[tokio::test]
    async fn test_unknown_queue_is_empty() {
        let (_, broker) = broker();
        let received = broker
            .receive_from_queue("missing", &ReceiveOptions::peek_lock())
            .await
            .unwrap();
        assert!(received.is_none());

        broker.create_queue("made");
        assert_eq!(broker.queue_depth("made").await.unwrap(), QueueDepth::Known(0));
    }

    #[tokio::test]
    async fn test_delete_without_lock_fails() {
        let (_, broker) = broker();
        let err = broker
            .delete_message(&BrokeredMessage::new("never received"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::LockLost(_)));
    }

    #[tokio::test]
    async fn test_topic_fans_out_to_existing_subscriptions() {
        let (_, broker) = broker();
        broker
            .create_subscription("events", &SubscriptionInfo::new("billing"))
            .await
            .unwrap();
        broker
            .create_subscription("events", &SubscriptionInfo::new("audit"))
            .await
            .unwrap();

        broker
            .send_to_topic("events", BrokeredMessage::new("created"))
            .await
            .unwrap();

        assert_eq!(broker.subscriptions("events"), vec!["audit", "billing"]);
        assert_eq!(broker.stored_in_subscription("events", "audit"), 1);
        assert_eq!(broker.stored_in_subscription("events", "billing"), 1);

        let options = ReceiveOptions::peek_lock();
        let audit = broker
            .receive_from_subscription("events", "audit", &options)
            .await
            .unwrap()
            .unwrap();
        broker.delete_message(&audit).await.unwrap();

        assert_eq!(broker.stored_in_subscription("events", "audit"), 0);
        assert_eq!(broker.stored_in_subscription("events", "billing"), 1);
    }

    #[tokio::test]
    async fn test_duplicate_subscription_reports_already_exists() {
        let (_, broker) = broker();
        let info = SubscriptionInfo::new("s1");
        broker.create_subscription("t1", &info).await.unwrap();

        let err = broker.create_subscription("t1", &info).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(broker.subscriptions("t1"), vec!["s1"]);
    }

    #[tokio::test]
    async fn test_unknown_subscription_not_found() {
        let (_, broker) = broker();
        let err = broker
            .receive_from_subscription("t1", "nope", &ReceiveOptions::peek_lock())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_subscription_lock_duration_override() {
        let (clock, broker) = broker();
        let info = SubscriptionInfo::new("fast").with_lock_duration(Duration::from_secs(5));
        broker.create_subscription("t", &info).await.unwrap();
        broker
            .send_to_topic("t", BrokeredMessage::new("x"))
            .await
            .unwrap();

        let options = ReceiveOptions::peek_lock();
        let first = broker
            .receive_from_subscription("t", "fast", &options)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            first.locked_until_utc,
            Some(clock.now() + chrono::Duration::seconds(5))
        );

        clock.advance(chrono::Duration::seconds(6));
        assert!(
            broker
                .receive_from_subscription("t", "fast", &options)
                .await
                .unwrap()
                .is_some()
        );
    }
}
