pub mod batcher;
pub mod error;
pub mod memory;
pub mod message;
pub mod pubsub;

pub use batcher::MicroBatcher;
pub use error::BusError;
pub use memory::InMemoryBus;
pub use message::{BusMessage, Publisher, Subscriber};
pub use pubsub::{PubSubClient, PubSubPublisher, PubSubSubscriber};
