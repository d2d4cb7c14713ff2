mod registry;
mod sync;

pub use registry::{Message, SubscriberRegistry, topic_key};
pub use sync::{Demand, NotifyProducer, SseConsumer, StreamSyncBroker};
