//! # Broker Providers
//!
//! - [`RabbitMqBroker`] - RabbitMQ via the `lapin` crate
//! - [`InMemoryBroker`] - in-process exchanges and queues for testing

mod in_memory;
mod rabbitmq;

pub use in_memory::InMemoryBroker;
pub use rabbitmq::{RabbitMqBroker, RabbitMqSettings};
