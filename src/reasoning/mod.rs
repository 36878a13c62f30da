//! Scoring and decision logic shared by the agents

pub mod decision;
pub mod mcda;

pub use decision::{clinical_need, safe_to_wait, DecisionEngine, DecisionInput};
pub use mcda::{
    Candidate, Criterion, CriterionScores, McdaBreakdown, McdaEngine, McdaPreset, McdaWeights,
    PriorityLevel, Ranked,
};
