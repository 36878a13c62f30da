//! Agent contract: observe, then decide
//!
//! `observe` only reads (State Store snapshot plus the stimulus context).
//! `decide` is a pure function of the observation, so identical observations
//! always yield identical decisions. The shared `execute` wrapper in
//! `executor.rs` does the writing and publishing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bus::topics;
use crate::domain::{CapacityAssessment, EscalationDecision, FlowRecommendation, RiskAssessment};
use crate::error::AgentError;
use crate::store::{StateKey, StateValue};

use super::context::{AgentContext, AgentRuntime};

/// The four agent variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Risk,
    Capacity,
    Flow,
    Escalation,
}

impl AgentKind {
    /// Source id stamped on published events
    pub fn id(&self) -> &'static str {
        match self {
            AgentKind::Risk => "risk_monitor",
            AgentKind::Capacity => "capacity_intelligence",
            AgentKind::Flow => "flow_orchestrator",
            AgentKind::Escalation => "escalation_decision",
        }
    }

    /// Topic the agent publishes its output on
    pub fn topic(&self) -> &'static str {
        match self {
            AgentKind::Risk => topics::RISK_CALCULATED,
            AgentKind::Capacity => topics::CAPACITY_UPDATED,
            AgentKind::Flow => topics::RECOMMENDATION_READY,
            AgentKind::Escalation => topics::DECISION_MADE,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Any agent's decision, as seen by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "agent", content = "output", rename_all = "snake_case")]
pub enum AgentOutput {
    Risk(RiskAssessment),
    Capacity(Vec<CapacityAssessment>),
    Flow(FlowRecommendation),
    Escalation(EscalationDecision),
}

impl From<RiskAssessment> for AgentOutput {
    fn from(v: RiskAssessment) -> Self {
        AgentOutput::Risk(v)
    }
}

impl From<Vec<CapacityAssessment>> for AgentOutput {
    fn from(v: Vec<CapacityAssessment>) -> Self {
        AgentOutput::Capacity(v)
    }
}

impl From<FlowRecommendation> for AgentOutput {
    fn from(v: FlowRecommendation) -> Self {
        AgentOutput::Flow(v)
    }
}

impl From<EscalationDecision> for AgentOutput {
    fn from(v: EscalationDecision) -> Self {
        AgentOutput::Escalation(v)
    }
}

/// Two-phase agent capability
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    type Observation: Send;
    type Decision: Into<AgentOutput> + Send + Sync;

    fn kind(&self) -> AgentKind;

    /// Gather the state this agent needs. Must not write anything.
    async fn observe(&self, ctx: &AgentContext) -> Result<Self::Observation, AgentError>;

    /// Deterministic decision from an observation
    fn decide(&self, observation: Self::Observation) -> Result<Self::Decision, AgentError>;

    /// State Store records the decision produces, one event each
    fn records(&self, decision: &Self::Decision) -> Vec<(StateKey, StateValue)>;
}

/// Object-safe view of an agent used by the orchestrator
#[async_trait]
pub trait StageRunner: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn run(
        &self,
        ctx: &AgentContext,
        runtime: &AgentRuntime,
    ) -> Result<AgentOutput, AgentError>;
}

#[async_trait]
impl<A: Agent> StageRunner for A {
    fn kind(&self) -> AgentKind {
        Agent::kind(self)
    }

    async fn run(
        &self,
        ctx: &AgentContext,
        runtime: &AgentRuntime,
    ) -> Result<AgentOutput, AgentError> {
        super::executor::execute(self, ctx, runtime)
            .await
            .map(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_topics_are_namespaced_by_id() {
        for kind in [
            AgentKind::Risk,
            AgentKind::Capacity,
            AgentKind::Flow,
            AgentKind::Escalation,
        ] {
            assert!(kind.topic().starts_with(kind.id()));
            assert!(kind.topic()[kind.id().len()..].starts_with('.'));
        }
    }
}
