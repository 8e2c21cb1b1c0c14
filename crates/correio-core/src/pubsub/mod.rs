mod receiver;
mod registry;
mod sender;

pub use receiver::PubSubReceiver;
pub use registry::{RegistryMonitor, SubscriberRegistry};
pub use sender::PubSubSender;
