// Peeklock - peek-lock queues and topics with delay scheduling
//
// This library re-exports the queue core and, behind the `servicebus`
// feature, the Azure Service Bus configuration and connector.

// Re-export core functionality
pub use peeklock_queue::*;

// Re-export optional crates
#[cfg(feature = "servicebus")]
pub use peeklock_servicebus;

#[cfg(feature = "servicebus")]
pub use peeklock_servicebus::{
    ClientFactory, ServiceBusConfig, ServiceBusConfigBuilder, ServiceBusConnector,
};

// Prelude for common imports
pub mod prelude {
    pub use peeklock_queue::prelude::*;

    #[cfg(feature = "servicebus")]
    pub use peeklock_servicebus::{ServiceBusConfig, ServiceBusConnector};
}
