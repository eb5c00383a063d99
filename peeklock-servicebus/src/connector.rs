//! Builds queue and topic channels from Service Bus configuration.

use crate::ServiceBusConfig;
use parking_lot::RwLock;
use peeklock_queue::{BrokerClient, DelayResolver, QueueChannel, QueueResult, TopicChannel};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Creates broker clients from a connection string.
///
/// Implemented for any `Fn(&str) -> QueueResult<Arc<dyn BrokerClient>>`, so an
/// SDK wrapper or an in-memory broker can be plugged in with a closure.
pub trait ClientFactory: Send + Sync {
    /// Create a client for the namespace the connection string points at.
    fn create(&self, connection_string: &str) -> QueueResult<Arc<dyn BrokerClient>>;
}

impl<F> ClientFactory for F
where
    F: Fn(&str) -> QueueResult<Arc<dyn BrokerClient>> + Send + Sync,
{
    fn create(&self, connection_string: &str) -> QueueResult<Arc<dyn BrokerClient>> {
        self(connection_string)
    }
}

/// Connector turning configuration into ready-to-use channels.
///
/// Clients are created lazily and shared per connection string, so queue and
/// topic channels built from the same configuration use one client.
pub struct ServiceBusConnector {
    factory: Arc<dyn ClientFactory>,
    delays: DelayResolver,
    clients: RwLock<HashMap<String, Arc<dyn BrokerClient>>>,
}

impl fmt::Debug for ServiceBusConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBusConnector")
            .field("clients", &self.clients.read().len())
            .field("delays", &self.delays)
            .finish()
    }
}

impl ServiceBusConnector {
    /// Create a connector around a client factory.
    pub fn new(factory: impl ClientFactory + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            delays: DelayResolver::new(),
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Delay resolver handed to every channel this connector builds.
    pub fn with_delay_resolver(mut self, delays: DelayResolver) -> Self {
        self.delays = delays;
        self
    }

    /// Build a queue channel bound to the configured default queue.
    pub fn connect(&self, config: &ServiceBusConfig) -> QueueResult<QueueChannel> {
        let client = self.client(config)?;
        info!(endpoint = %config.endpoint, queue = %config.queue, "Service Bus queue connected");
        Ok(QueueChannel::new(client, config.queue.clone()).with_delay_resolver(self.delays.clone()))
    }

    /// Build a topic channel carrying the configured topics.
    pub fn connect_topics(&self, config: &ServiceBusConfig) -> QueueResult<TopicChannel> {
        let client = self.client(config)?;
        info!(endpoint = %config.endpoint, topics = ?config.topics, "Service Bus topics connected");
        Ok(TopicChannel::new(client)
            .with_topics(config.topics.iter().cloned())
            .with_delay_resolver(self.delays.clone()))
    }

    /// Number of distinct clients created so far.
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    fn client(&self, config: &ServiceBusConfig) -> QueueResult<Arc<dyn BrokerClient>> {
        config.validate()?;
        let connection_string = config.connection_string();

        if let Some(client) = self.clients.read().get(&connection_string) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write();
        if let Some(client) = clients.get(&connection_string) {
            return Ok(client.clone());
        }

        let client = self.factory.create(&connection_string)?;
        debug!(endpoint = %config.endpoint, "Created Service Bus client");
        clients.insert(connection_string, client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use peeklock_queue::{InMemoryBroker, QueueError};

    fn recording_factory() -> (Arc<Mutex<Vec<String>>>, impl ClientFactory + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let broker = InMemoryBroker::new();
        let recorder = seen.clone();
        let factory = move |connection_string: &str| -> QueueResult<Arc<dyn BrokerClient>> {
            recorder.lock().push(connection_string.to_string());
            Ok(Arc::new(broker.clone()))
        };
        (seen, factory)
    }

    #[test]
    fn test_connect_passes_connection_string() {
        let (seen, factory) = recording_factory();
        let connector = ServiceBusConnector::new(factory);

        let config = ServiceBusConfig::builder()
            .endpoint("sb://acme/")
            .shared_access_key_name("app")
            .shared_access_key("secret")
            .queue("orders")
            .build();
        let queue = connector.connect(&config).unwrap();

        assert_eq!(queue.default_queue(), "orders");
        assert_eq!(
            seen.lock().as_slice(),
            ["Endpoint=sb://acme/;SharedAccessKeyName=app;SharedAccessKey=secret".to_string()]
        );
    }

    #[test]
    fn test_client_shared_between_channels() {
        let (seen, factory) = recording_factory();
        let connector = ServiceBusConnector::new(factory);
        let config = ServiceBusConfig::builder().topics(["t1", "t2"]).build();

        connector.connect(&config).unwrap();
        let topics = connector.connect_topics(&config).unwrap();

        assert_eq!(topics.topics(), ["t1".to_string(), "t2".to_string()]);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(connector.client_count(), 1);
    }

    #[test]
    fn test_invalid_config_never_reaches_factory() {
        let (seen, factory) = recording_factory();
        let connector = ServiceBusConnector::new(factory);
        let config = ServiceBusConfig::builder().shared_access_key_name("").build();

        let err = connector.connect(&config).unwrap_err();
        assert!(matches!(err, QueueError::Configuration(_)));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_factory_error_propagates() {
        let connector = ServiceBusConnector::new(|_: &str| -> QueueResult<Arc<dyn BrokerClient>> {
            Err(QueueError::Configuration("namespace unreachable".to_string()))
        });

        let err = connector.connect(&ServiceBusConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: namespace unreachable");
        assert_eq!(connector.client_count(), 0);
    }

    #[tokio::test]
    async fn test_connected_queue_round_trip() {
        let (_, factory) = recording_factory();
        let connector = ServiceBusConnector::new(factory);
        let queue = connector.connect(&ServiceBusConfig::default()).unwrap();

        queue.enqueue("ping", None).await.unwrap();
        let mut job = queue.receive(Some("defaultQueue")).await.unwrap().unwrap();
        assert_eq!(job.raw_payload(), b"ping");
        job.delete().await.unwrap();
    }
}
