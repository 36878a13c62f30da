pub mod agents;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod reasoning;
pub mod store;

pub use agents::{
    Agent, AgentContext, AgentKind, AgentOutput, AgentRuntime, CapacityAgent, EscalationAgent,
    FlowAgent, RiskAgent, StageRunner,
};
pub use bus::{topics, DeliveryReport, Event, EventBus, SubscriptionId, TopicPattern};
pub use config::AppConfig;
pub use coordinator::{
    AgentSet, Orchestrator, PipelineKey, PipelineReport, PipelineStage, PipelineStatus,
    StimulusOutcome,
};
pub use error::{AgentError, BusError, CareError, McdaError, Result, StoreError};
pub use reasoning::{DecisionEngine, McdaEngine};
pub use store::{InMemoryStateStore, StateKey, StateKind, StateStore, StateValue};
