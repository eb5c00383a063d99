//! # Peeklock Service Bus
//!
//! Azure Service Bus configuration and a connector that turns it into
//! peek-lock queue and topic channels.
//!
//! The connector does not speak the Service Bus wire protocol itself. It
//! renders the connection string and hands it to a [`ClientFactory`], which
//! returns any [`BrokerClient`](peeklock_queue::BrokerClient).
//!
//! ## Quick Start
//!
//! ```
//! use peeklock_queue::{BrokerClient, InMemoryBroker, QueueResult};
//! use peeklock_servicebus::{ServiceBusConfig, ServiceBusConnector};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> QueueResult<()> {
//! let config = ServiceBusConfig::builder()
//!     .endpoint("sb://acme.servicebus.windows.net/")
//!     .shared_access_key_name("app")
//!     .shared_access_key("secret")
//!     .queue("orders")
//!     .topic("events")
//!     .build();
//!
//! let broker = InMemoryBroker::new();
//! let connector = ServiceBusConnector::new(move |_: &str| -> QueueResult<Arc<dyn BrokerClient>> {
//!     Ok(Arc::new(broker.clone()))
//! });
//!
//! let queue = connector.connect(&config)?;
//! queue.enqueue("hello", None).await?;
//!
//! let topics = connector.connect_topics(&config)?;
//! assert_eq!(topics.topics(), ["events".to_string()]);
//! # Ok(())
//! # }
//! ```
//!
//! ## From the Environment
//!
//! ```no_run
//! use peeklock_servicebus::ServiceBusConfig;
//!
//! let config = ServiceBusConfig::from_env().build();
//! config.validate().expect("Service Bus credentials");
//! ```

mod config;
mod connector;

pub use config::{
    DEFAULT_ENDPOINT, DEFAULT_KEY, DEFAULT_KEY_NAME, DEFAULT_QUEUE, ServiceBusConfig,
    ServiceBusConfigBuilder,
};
pub use connector::{ClientFactory, ServiceBusConnector};
