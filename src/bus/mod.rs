//! Topic-based event bus shared by the orchestrator and the agents

pub mod event;
pub mod event_bus;

pub use event::{topics, Event, TopicPattern};
pub use event_bus::{BusStats, DeliveryReport, EventBus, EventHandler, SubscriptionId};
