//! Live activity streaming on top of the durable task event log.

mod bus;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
