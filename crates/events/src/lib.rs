//! Event contracts and the pub/sub bus used to hand notifications to outside
//! collaborators (alerting, dashboards). Delivery itself is not our concern.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::{EventEnvelope, NotificationEnvelope};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
