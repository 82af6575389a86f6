pub mod events;
pub mod registry;

pub use events::{JobEvent, Notifier};
pub use registry::{JobEventBroadcaster, SubscriberRegistry};
