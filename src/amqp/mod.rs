//! AMQP integration for the queue service
//!
//! Commands arrive on a durable queue and every outbound event goes to one
//! topic exchange, keyed by the routing keys in [`messages`].

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

pub use connection::AmqpConnection;
pub use handlers::{CommandConsumer, CommandHandler};
pub use messages::*;
pub use publisher::{AmqpEventPublisher, EventPublisher, MockEventPublisher, PublisherConfig};
