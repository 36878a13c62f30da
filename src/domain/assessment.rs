use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::reasoning::{McdaBreakdown, PriorityLevel};

/// Direction of a patient's condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trajectory {
    Improving,
    Stable,
    Deteriorating,
    Critical,
}

impl Trajectory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trajectory::Improving => "improving",
            Trajectory::Stable => "stable",
            Trajectory::Deteriorating => "deteriorating",
            Trajectory::Critical => "critical",
        }
    }
}

impl fmt::Display for Trajectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 81.0 {
            RiskLevel::Critical
        } else if score >= 61.0 {
            RiskLevel::High
        } else if score >= 31.0 {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }
}

/// Risk Assessment agent output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub patient_id: String,
    /// Stimulus this assessment was computed for
    #[serde(default)]
    pub stimulus_id: String,
    /// 0..=100
    pub score: f64,
    pub trajectory: Trajectory,
    pub confidence: f64,
    pub contributing_factors: BTreeSet<String>,
    pub risk_level: RiskLevel,
    pub vital_points: f64,
    pub deterioration_points: f64,
    pub history_points: f64,
    pub consciousness_points: f64,
    pub escalation_required: bool,
    pub monitoring_interval_minutes: u32,
    pub samples_used: usize,
    pub produced_at: DateTime<Utc>,
}

/// Capacity Assessment agent output, one per unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityAssessment {
    pub unit_id: String,
    /// occupied / total
    pub occupancy_rate: f64,
    /// Occupied beds per staff member on duty; absent when nobody is on shift
    pub staff_ratio: Option<f64>,
    /// 0..=100, higher means more room
    pub capacity_score: f64,
    pub available_beds: u32,
    pub predicted_availability: Option<DateTime<Utc>>,
    pub bottleneck: Option<String>,
    pub confidence: f64,
    pub produced_at: DateTime<Utc>,
}

impl CapacityAssessment {
    pub fn has_bed(&self) -> bool {
        self.available_beds > 0
    }
}

/// Terminal care actions, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CareAction {
    Escalate,
    Admit,
    Transfer,
    Reprioritize,
    Observe,
    Delay,
}

impl CareAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CareAction::Escalate => "escalate",
            CareAction::Admit => "admit",
            CareAction::Transfer => "transfer",
            CareAction::Reprioritize => "reprioritize",
            CareAction::Observe => "observe",
            CareAction::Delay => "delay",
        }
    }

    pub fn ordinal(&self) -> u64 {
        *self as u64
    }
}

impl fmt::Display for CareAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A ranked placement candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementOption {
    pub unit_id: String,
    pub available_beds: u32,
    pub viable: bool,
    pub breakdown: McdaBreakdown,
}

/// Flow Recommendation agent output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecommendation {
    pub patient_id: String,
    #[serde(default)]
    pub stimulus_id: String,
    pub action: CareAction,
    pub target_unit: Option<String>,
    /// Ordered by descending MCDA score
    pub alternatives: Vec<PlacementOption>,
    /// Breakdown of the top-ranked placement
    pub breakdown: Option<McdaBreakdown>,
    pub confidence: f64,
    pub produced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Immediate,
    Urgent,
    Soon,
    Routine,
}

impl UrgencyLevel {
    pub fn from_safe_to_wait(p: f64) -> Self {
        if p < 0.25 {
            UrgencyLevel::Immediate
        } else if p < 0.5 {
            UrgencyLevel::Urgent
        } else if p < 0.75 {
            UrgencyLevel::Soon
        } else {
            UrgencyLevel::Routine
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    Uncertain,
}

impl ConfidenceLevel {
    pub fn from_confidence(c: f64) -> Self {
        if c >= 0.8 {
            ConfidenceLevel::High
        } else if c >= 0.5 {
            ConfidenceLevel::Medium
        } else if c >= 0.2 {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::Uncertain
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyMetrics {
    pub safe_to_wait: f64,
    pub confidence_level: ConfidenceLevel,
    /// Dispersion of the chosen action's criterion scores
    pub model_uncertainty: f64,
    pub recommended_wait_minutes: u32,
    pub max_safe_wait_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionScore {
    pub action: CareAction,
    pub breakdown: McdaBreakdown,
}

/// Final decision, exactly one per (stimulus, patient)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub decision_id: String,
    pub stimulus_id: String,
    pub patient_id: String,
    pub action: CareAction,
    pub target_unit: Option<String>,
    pub reasoning: String,
    pub breakdown: McdaBreakdown,
    pub confidence: f64,
    /// Every scored action, best first
    pub alternatives: Vec<ActionScore>,
    pub urgency: UrgencyLevel,
    /// Band of the chosen action's weighted total
    pub priority: PriorityLevel,
    pub uncertainty: UncertaintyMetrics,
    pub override_applied: bool,
    pub requires_review: bool,
    pub timestamp: DateTime<Utc>,
}
