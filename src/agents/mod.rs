//! Care agents: observe/decide implementations run by the orchestrator
//!
//! Each agent implements `Agent`. The shared `execute` wrapper stores the
//! decision and publishes it on the agent's topic.

pub mod capacity;
pub mod context;
pub mod escalation;
pub mod executor;
pub mod flow;
pub mod risk;
pub mod traits;

pub use capacity::{CapacityAgent, CapacityObservation};
pub use context::{AgentContext, AgentRuntime};
pub use escalation::{EscalationAgent, EscalationObservation};
pub use executor::execute;
pub use flow::{FlowAgent, FlowObservation};
pub use risk::{RiskAgent, RiskObservation};
pub use traits::{Agent, AgentKind, AgentOutput, StageRunner};
