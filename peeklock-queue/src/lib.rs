//! Peek-lock queues and topics over a pluggable broker client.
//!
//! Provides:
//! - Queue channels with immediate and delayed sends
//! - Topic channels with durable, self-creating subscriptions
//! - Leased messages that are deleted or released exactly once
//! - One delay resolver for every scheduled send and release
//! - An in-memory broker for tests and local development
//!
//! ## Delays
//!
//! ```
//! use peeklock_queue::{Delay, DelayResolver, ManualClock};
//! use std::sync::Arc;
//!
//! let clock = ManualClock::starting_now();
//! let resolver = DelayResolver::with_clock(Arc::new(clock.clone()));
//!
//! // Whole seconds
//! let at = resolver.resolve(60).unwrap();
//! assert_eq!(at, resolver.now() + chrono::Duration::seconds(60));
//!
//! // Intervals and absolute times work too
//! assert_eq!(resolver.resolve(chrono::Duration::minutes(1)).unwrap(), at);
//! assert_eq!(resolver.resolve(at).unwrap(), at);
//!
//! // Negative delays are rejected
//! assert!(resolver.resolve(Delay::Seconds(-5)).is_err());
//! ```
//!
//! ## Payloads
//!
//! ```
//! use peeklock_queue::Payload;
//! use serde_json::json;
//!
//! // Structured values become canonical JSON
//! let payload = Payload::from(json!({"b": 2, "a": 1}));
//! assert_eq!(payload.encode().unwrap(), br#"{"a":1,"b":2}"#.to_vec());
//!
//! // Text is sent as is
//! assert_eq!(Payload::from("hello").encode().unwrap(), b"hello".to_vec());
//! ```
//!
//! ## Complete Example
//!
//! ```
//! use peeklock_queue::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), QueueError> {
//!     let broker = Arc::new(InMemoryBroker::new());
//!     let queue = QueueChannel::new(broker.clone(), "emails");
//!
//!     queue
//!         .push("send_welcome", serde_json::json!({"to": "user@example.com"}), None)
//!         .await?;
//!
//!     if let Some(mut job) = queue.receive(None).await? {
//!         let envelope = job.envelope()?;
//!         assert_eq!(envelope.job, "send_welcome");
//!         job.delete().await?;
//!     }
//!
//!     let topics = TopicChannel::new(broker);
//!     topics.ensure_subscription("orders", "audit").await?;
//!     topics.publish("orders", serde_json::json!({"id": 7})).await?;
//!
//!     let mut event = topics.subscribe("orders", "audit").await?.expect("published");
//!     event.release(30).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod delay;
pub mod error;
pub mod job;
pub mod memory;
pub mod payload;
pub mod queue;
pub mod topic;

pub use broker::{
    BrokerClient, BrokeredMessage, QueueDepth, ReceiveMode, ReceiveOptions, SubscriptionInfo,
};
pub use delay::{Clock, Delay, DelayResolver, ManualClock, SystemClock};
pub use error::{BrokerError, QueueError, QueueResult};
pub use job::{LeaseState, LeasedMessage, MessageSource};
pub use memory::InMemoryBroker;
pub use payload::{JobData, JobEnvelope, Payload, decode_json};
pub use queue::QueueChannel;
pub use topic::TopicChannel;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::broker::{BrokerClient, BrokeredMessage, QueueDepth};
    pub use crate::delay::{Delay, DelayResolver};
    pub use crate::error::{BrokerError, QueueError, QueueResult};
    pub use crate::job::LeasedMessage;
    pub use crate::memory::InMemoryBroker;
    pub use crate::payload::{JobData, JobEnvelope, Payload};
    pub use crate::queue::QueueChannel;
    pub use crate::topic::TopicChannel;
}
