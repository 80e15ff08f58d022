// Message bus
//
// Topic-addressed publish/subscribe decoupling publishers from subscribers.
// Delivery is at-most-once, ordered per (publisher, topic) as the transport
// sees it, with optional best-effort replay of recent history.

pub mod envelope;
pub mod errors;
pub mod memory;
pub mod message_bus;
pub mod transport;

pub use envelope::{BusMessage, Metadata};
pub use errors::{BusError, BusResult};
pub use memory::MemoryTransport;
pub use message_bus::{BusConfig, MessageBus, MessageHandler, PublishOptions, Subscription};
pub use transport::{ChannelCallback, PubSubTransport, TransportConnection};
