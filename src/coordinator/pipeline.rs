//! Pipeline state machine, one instance per (stimulus, subject)

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::agents::AgentKind;
use crate::domain::{EscalationDecision, Subject};

/// Identity of one pipeline instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipelineKey {
    pub stimulus_id: String,
    pub subject: Subject,
}

impl PipelineKey {
    pub fn new(stimulus_id: impl Into<String>, subject: Subject) -> Self {
        Self {
            stimulus_id: stimulus_id.into(),
            subject,
        }
    }
}

impl fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.stimulus_id, self.subject)
    }
}

/// Pipeline progress. Risk and Capacity complete in either order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    /// Ingested, upstream agents dispatched
    Pending,
    RiskReady,
    CapacityReady,
    FlowReady,
    EscalationReady,
    Complete,
    /// A barrier was not met in time
    TimedOut,
    /// An agent failed or the stimulus was rejected
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Pending => "PENDING",
            PipelineStage::RiskReady => "RISK_READY",
            PipelineStage::CapacityReady => "CAPACITY_READY",
            PipelineStage::FlowReady => "FLOW_READY",
            PipelineStage::EscalationReady => "ESCALATION_READY",
            PipelineStage::Complete => "COMPLETE",
            PipelineStage::TimedOut => "TIMED_OUT",
            PipelineStage::Failed => "FAILED",
        }
    }

    /// Check if transition to target stage is valid
    pub fn can_transition_to(&self, target: PipelineStage) -> bool {
        use PipelineStage::*;

        match (self, target) {
            // Upstream results, either order
            (Pending, RiskReady) | (Pending, CapacityReady) => true,
            (RiskReady, CapacityReady) | (CapacityReady, RiskReady) => true,

            // Join barrier passed
            (RiskReady, FlowReady) | (CapacityReady, FlowReady) => true,
            (FlowReady, EscalationReady) => true,
            (EscalationReady, Complete) => true,

            // Capacity-only refresh
            (CapacityReady, Complete) => true,
            // Stimulus changed nothing
            (Pending, Complete) => true,

            (from, TimedOut) | (from, Failed) => !from.is_terminal(),

            _ => false,
        }
    }

    /// Get valid next stages from the current one
    pub fn valid_transitions(&self) -> Vec<PipelineStage> {
        use PipelineStage::*;

        match self {
            Pending => vec![RiskReady, CapacityReady, Complete, TimedOut, Failed],
            RiskReady => vec![CapacityReady, FlowReady, TimedOut, Failed],
            CapacityReady => vec![RiskReady, FlowReady, Complete, TimedOut, Failed],
            FlowReady => vec![EscalationReady, TimedOut, Failed],
            EscalationReady => vec![Complete, TimedOut, Failed],
            Complete | TimedOut | Failed => vec![],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Complete | PipelineStage::TimedOut | PipelineStage::Failed
        )
    }

    /// Stage reached when `agent` delivers its output
    pub fn on_output(agent: AgentKind) -> Self {
        match agent {
            AgentKind::Risk => PipelineStage::RiskReady,
            AgentKind::Capacity => PipelineStage::CapacityReady,
            AgentKind::Flow => PipelineStage::FlowReady,
            AgentKind::Escalation => PipelineStage::EscalationReady,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a pipeline ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineStatus {
    Complete,
    /// Join timeout; no decision is emitted for the stimulus
    TimedOut { waiting_on: Vec<AgentKind> },
    Failed { agent: AgentKind, reason: String },
    /// The stimulus could not be applied to the State Store
    Rejected { reason: String },
    /// The stimulus was already reflected in the State Store; no agent ran
    Unchanged,
}

impl PipelineStatus {
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineStatus::Complete | PipelineStatus::Unchanged => PipelineStage::Complete,
            PipelineStatus::TimedOut { .. } => PipelineStage::TimedOut,
            PipelineStatus::Failed { .. } | PipelineStatus::Rejected { .. } => {
                PipelineStage::Failed
            }
        }
    }
}

/// Dispatch and completion offsets of one agent, relative to pipeline start
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub agent: AgentKind,
    pub dispatched_ms: u64,
    pub finished_ms: Option<u64>,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub key: PipelineKey,
    pub status: PipelineStatus,
    pub stages: Vec<StageRecord>,
    pub decision: Option<EscalationDecision>,
    pub elapsed_ms: u64,
}

impl PipelineReport {
    pub fn stage(&self, agent: AgentKind) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.agent == agent)
    }
}

/// Live bookkeeping for one pipeline
#[derive(Debug, Clone)]
pub struct PipelineTracker {
    key: PipelineKey,
    stage: PipelineStage,
    ready: BTreeSet<AgentKind>,
    stages: Vec<StageRecord>,
    started: Instant,
}

impl PipelineTracker {
    pub fn new(key: PipelineKey) -> Self {
        Self {
            key,
            stage: PipelineStage::Pending,
            ready: BTreeSet::new(),
            stages: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn is_ready(&self, agent: AgentKind) -> bool {
        self.ready.contains(&agent)
    }

    fn offset_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Attempt a transition; invalid ones are logged and ignored
    pub fn advance(&mut self, target: PipelineStage) -> bool {
        if target == PipelineStage::FlowReady
            && !(self.is_ready(AgentKind::Risk) && self.is_ready(AgentKind::Capacity))
        {
            warn!("{}: flow output before join barrier was met", self.key);
            return false;
        }
        if !self.stage.can_transition_to(target) {
            warn!(
                "{}: invalid stage transition {} -> {}",
                self.key, self.stage, target
            );
            return false;
        }
        debug!("{}: {} -> {}", self.key, self.stage, target);
        self.stage = target;
        true
    }

    pub fn dispatched(&mut self, agent: AgentKind) {
        let at = self.offset_ms();
        self.stages.push(StageRecord {
            agent,
            dispatched_ms: at,
            finished_ms: None,
            succeeded: false,
        });
    }

    pub fn finished(&mut self, agent: AgentKind, succeeded: bool) {
        let at = self.offset_ms();
        if let Some(record) = self.stages.iter_mut().rev().find(|s| s.agent == agent) {
            record.finished_ms = Some(at);
            record.succeeded = succeeded;
        }
        if succeeded {
            self.ready.insert(agent);
            self.advance(PipelineStage::on_output(agent));
        }
    }

    pub fn finish(
        &mut self,
        status: PipelineStatus,
        decision: Option<EscalationDecision>,
    ) -> PipelineReport {
        let target = status.stage();
        if self.stage != target {
            self.advance(target);
        }
        PipelineReport {
            key: self.key.clone(),
            status,
            stages: self.stages.clone(),
            decision,
            elapsed_ms: self.offset_ms(),
        }
    }
}
