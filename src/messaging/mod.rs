//! # Messaging Module
//!
//! Broker-backed messaging for the triage pipeline: the JSON envelope, the
//! exchange/queue topology, a broker seam with RabbitMQ and in-memory
//! providers, the retrying publisher, the polling consumer and the dead-letter
//! handler.

pub mod consumer;
pub mod dead_letter;
pub mod envelope;
pub mod errors;
pub mod publisher;
pub mod service;
pub mod topology;

pub use consumer::{
    ConsumeStats, ConsumedMessage, ConsumerConfig, DeliveryOutcome, DeliveryProcessor,
    HandlerError, HandlerRegistry, InboundMessage, MessageHandler, QueueConsumer,
};
pub use dead_letter::{
    DeadLetterDecision, DeadLetterHandler, FailedMessage, RetryPolicy, RetryPredicate,
};
pub use envelope::{
    decode, encode, peek_message_type, DecodedMessage, EnvelopeError, FailureInfo, MessageType,
    RawEnvelope, TriageMessage,
};
pub use errors::MessagingError;
pub use publisher::{BatchOutcome, MessagePublisher, PublishStats, PublisherConfig};
pub use service::{
    Delivery, InMemoryBroker, MessageBroker, MessageProperties, QueueStats, RabbitMqBroker,
    RabbitMqSettings,
};
pub use topology::{QueueDeclaration, Topology};
