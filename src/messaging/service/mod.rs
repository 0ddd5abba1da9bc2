//! # Broker Abstraction
//!
//! ```text
//! MessageBroker (trait)
//!   ├── RabbitMqBroker   lapin, AMQP 0.9.1
//!   └── InMemoryBroker   topic routing + DLX in process, for tests and dry runs
//! ```
//!
//! Callers hold an `Arc<dyn MessageBroker>`; the publisher, consumer and
//! dead-letter handler never see a concrete provider.

pub mod providers;
mod traits;
mod types;

pub use providers::{InMemoryBroker, RabbitMqBroker, RabbitMqSettings};
pub use traits::MessageBroker;
pub use types::{Delivery, MessageProperties, QueueStats, JSON_CONTENT_TYPE};
