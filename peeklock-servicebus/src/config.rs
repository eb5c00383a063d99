//! Service Bus configuration.

use peeklock_queue::{QueueError, QueueResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://your-namespace.servicebus.windows.net";
/// Shared access key name used when none is configured.
pub const DEFAULT_KEY_NAME: &str = "defaultKeyName";
/// Shared access key used when none is configured.
pub const DEFAULT_KEY: &str = "defaultKey";
/// Default queue used when none is configured.
pub const DEFAULT_QUEUE: &str = "defaultQueue";

/// Service Bus namespace configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceBusConfig {
    /// Namespace endpoint.
    pub endpoint: String,
    /// Shared access key name.
    pub shared_access_key_name: String,
    /// Shared access key.
    pub shared_access_key: String,
    /// Default queue for sends and receives without an explicit queue.
    pub queue: String,
    /// Topics the application publishes to or subscribes on.
    pub topics: Vec<String>,
}

impl Default for ServiceBusConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            shared_access_key_name: DEFAULT_KEY_NAME.to_string(),
            shared_access_key: DEFAULT_KEY.to_string(),
            queue: DEFAULT_QUEUE.to_string(),
            topics: Vec::new(),
        }
    }
}

// Keeps the key out of logs.
impl fmt::Debug for ServiceBusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBusConfig")
            .field("endpoint", &self.endpoint)
            .field("shared_access_key_name", &self.shared_access_key_name)
            .field("shared_access_key", &"<redacted>")
            .field("queue", &self.queue)
            .field("topics", &self.topics)
            .finish()
    }
}

impl ServiceBusConfig {
    /// Create a configuration with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder.
    pub fn builder() -> ServiceBusConfigBuilder {
        ServiceBusConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// Reads `AZURE_SERVICE_BUS_ENDPOINT`, `AZURE_SERVICE_BUS_KEY_NAME`,
    /// `AZURE_SERVICE_BUS_KEY`, `AZURE_SERVICE_BUS_QUEUE` and
    /// `AZURE_SERVICE_BUS_TOPICS` (comma separated). Unset variables keep
    /// their defaults.
    pub fn from_env() -> ServiceBusConfigBuilder {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> ServiceBusConfigBuilder
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = ServiceBusConfigBuilder::new();

        if let Some(endpoint) = lookup("AZURE_SERVICE_BUS_ENDPOINT") {
            builder = builder.endpoint(endpoint);
        }

        if let Some(key_name) = lookup("AZURE_SERVICE_BUS_KEY_NAME") {
            builder = builder.shared_access_key_name(key_name);
        }

        if let Some(key) = lookup("AZURE_SERVICE_BUS_KEY") {
            builder = builder.shared_access_key(key);
        }

        if let Some(queue) = lookup("AZURE_SERVICE_BUS_QUEUE") {
            builder = builder.queue(queue);
        }

        if let Some(topics) = lookup("AZURE_SERVICE_BUS_TOPICS") {
            builder = builder.topics(parse_topics(&topics));
        }

        builder
    }

    /// Render the SDK connection string.
    pub fn connection_string(&self) -> String {
        format!(
            "Endpoint={};SharedAccessKeyName={};SharedAccessKey={}",
            self.endpoint, self.shared_access_key_name, self.shared_access_key
        )
    }

    /// Check that the credentials are usable.
    pub fn validate(&self) -> QueueResult<()> {
        let required = [
            ("endpoint", &self.endpoint),
            ("shared_access_key_name", &self.shared_access_key_name),
            ("shared_access_key", &self.shared_access_key),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(QueueError::Configuration(format!(
                    "Service Bus {} must not be empty",
                    field
                )));
            }
        }
        Ok(())
    }
}

fn parse_topics(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|topic| !topic.is_empty())
        .map(String::from)
        .collect()
}

/// Builder for Service Bus configuration.
#[derive(Debug, Clone, Default)]
pub struct ServiceBusConfigBuilder {
    config: ServiceBusConfig,
}

impl ServiceBusConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the namespace endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Set the shared access key name.
    pub fn shared_access_key_name(mut self, name: impl Into<String>) -> Self {
        self.config.shared_access_key_name = name.into();
        self
    }

    /// Set the shared access key.
    pub fn shared_access_key(mut self, key: impl Into<String>) -> Self {
        self.config.shared_access_key = key.into();
        self
    }

    /// Set the default queue.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.config.queue = queue.into();
        self
    }

    /// Add a topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.config.topics.push(topic.into());
        self
    }

    /// Replace the topic list.
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ServiceBusConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceBusConfig::default();
        assert_eq!(config.endpoint, "https://your-namespace.servicebus.windows.net");
        assert_eq!(config.shared_access_key_name, "defaultKeyName");
        assert_eq!(config.shared_access_key, "defaultKey");
        assert_eq!(config.queue, "defaultQueue");
        assert!(config.topics.is_empty());
    }

    #[test]
    fn test_lookup_with_nothing_set_keeps_defaults() {
        let config = ServiceBusConfig::from_lookup(lookup(&[])).build();
        assert_eq!(config, ServiceBusConfig::default());
    }

    #[test]
    fn test_lookup_reads_every_variable() {
        let config = ServiceBusConfig::from_lookup(lookup(&[
            ("AZURE_SERVICE_BUS_ENDPOINT", "sb://acme.servicebus.windows.net/"),
            ("AZURE_SERVICE_BUS_KEY_NAME", "RootManageSharedAccessKey"),
            ("AZURE_SERVICE_BUS_KEY", "c2VjcmV0"),
            ("AZURE_SERVICE_BUS_QUEUE", "orders"),
            ("AZURE_SERVICE_BUS_TOPICS", "events, ,audit,"),
        ]))
        .build();

        assert_eq!(config.endpoint, "sb://acme.servicebus.windows.net/");
        assert_eq!(config.shared_access_key_name, "RootManageSharedAccessKey");
        assert_eq!(config.shared_access_key, "c2VjcmV0");
        assert_eq!(config.queue, "orders");
        assert_eq!(config.topics, vec!["events".to_string(), "audit".to_string()]);
    }

    #[test]
    fn test_connection_string() {
        let config = ServiceBusConfig::builder()
            .endpoint("sb://acme.servicebus.windows.net/")
            .shared_access_key_name("sender")
            .shared_access_key("k3y=")
            .build();

        assert_eq!(
            config.connection_string(),
            concat!(
                "Endpoint=sb://acme.servicebus.windows.net/;",
                "SharedAccessKeyName=sender;",
                "SharedAccessKey=k3y="
            )
        );
    }

    #[test]
    fn test_validate() {
        assert!(ServiceBusConfig::default().validate().is_ok());

        let config = ServiceBusConfig::builder().shared_access_key("").build();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            QueueError::Configuration(ref msg) if msg.contains("shared_access_key")
        ));

        let config = ServiceBusConfig::builder().endpoint("  ").build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_queue_is_allowed() {
        // An empty default queue only matters once a send omits the queue name.
        let config = ServiceBusConfig::builder().queue("").build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_topics() {
        let config = ServiceBusConfig::builder()
            .topic("a")
            .topic("b")
            .build();
        assert_eq!(config.topics, vec!["a".to_string(), "b".to_string()]);

        let config = ServiceBusConfig::builder().topics(["x"]).build();
        assert_eq!(config.topics, vec!["x".to_string()]);
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = ServiceBusConfig::builder().shared_access_key("hunter2").build();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_deserialize_with_partial_fields() {
        let config: ServiceBusConfig =
            serde_json::from_str(r#"{"queue": "jobs", "topics": ["t1"]}"#).unwrap();
        assert_eq!(config.queue, "jobs");
        assert_eq!(config.topics, vec!["t1".to_string()]);
        assert_eq!(config.shared_access_key_name, DEFAULT_KEY_NAME);
    }
}
