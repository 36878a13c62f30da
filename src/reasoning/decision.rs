//! Decision engine: MCDA over candidate actions plus a safe-to-wait policy
//!
//! Every candidate action gets an intensity on a 0..1 scale. Its Safety score
//! is how closely that intensity matches the patient's clinical need, and its
//! Urgency score is how closely it matches `1 - safe_to_wait`. The top MCDA
//! action stands unless safe-to-wait falls below the configured threshold, in
//! which case the action is forced to escalate.

use chrono::{DateTime, Utc};

use super::mcda::{Candidate, CriterionScores, McdaEngine, Ranked};
use crate::config::DecisionConfig;
use crate::domain::{
    ActionScore, CapacityAssessment, CareAction, ConfidenceLevel, EscalationDecision,
    FlowRecommendation, RiskAssessment, Trajectory, UncertaintyMetrics, UrgencyLevel,
};

/// Safe-to-wait ceiling per trajectory, reached at full capacity
fn trajectory_base(trajectory: Trajectory) -> f64 {
    match trajectory {
        Trajectory::Improving => 0.85,
        Trajectory::Stable => 0.70,
        Trajectory::Deteriorating => 0.35,
        Trajectory::Critical => 0.0,
    }
}

/// Probability-like estimate that acting can be deferred.
///
/// Zero for a critical trajectory. Otherwise linear in capacity, scaling the
/// trajectory ceiling between 60% (no capacity) and 100% (full capacity).
pub fn safe_to_wait(trajectory: Trajectory, capacity_score: f64) -> f64 {
    if trajectory == Trajectory::Critical {
        return 0.0;
    }
    let c = (capacity_score / 100.0).clamp(0.0, 1.0);
    trajectory_base(trajectory) * (0.6 + 0.4 * c)
}

/// Clinical need in [0,1] from the risk score, adjusted by trajectory
pub fn clinical_need(risk: &RiskAssessment) -> f64 {
    let base = (risk.score / 100.0).clamp(0.0, 1.0);
    match risk.trajectory {
        Trajectory::Critical => 1.0,
        Trajectory::Deteriorating => (base * 1.3).min(1.0),
        Trajectory::Improving => base * 0.8,
        Trajectory::Stable => base,
    }
}

fn intensity(action: CareAction) -> f64 {
    match action {
        CareAction::Escalate => 1.0,
        CareAction::Admit | CareAction::Transfer => 0.6,
        CareAction::Reprioritize => 0.45,
        CareAction::Observe => 0.25,
        CareAction::Delay => 0.1,
    }
}

fn wait_window(p: f64) -> (u32, u32) {
    if p >= 0.6 {
        (15, 30)
    } else if p >= 0.4 {
        (5, 15)
    } else {
        (0, 5)
    }
}

/// Everything the engine reads for one patient
#[derive(Debug, Clone)]
pub struct DecisionInput<'a> {
    pub stimulus_id: &'a str,
    pub patient_id: &'a str,
    pub location: Option<&'a str>,
    pub risk: &'a RiskAssessment,
    /// Capacity of the unit the patient would go to
    pub capacity: &'a CapacityAssessment,
    pub flow: &'a FlowRecommendation,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    mcda: McdaEngine,
    policy: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(mcda: McdaEngine, policy: DecisionConfig) -> Self {
        Self { mcda, policy }
    }

    pub fn policy(&self) -> &DecisionConfig {
        &self.policy
    }

    /// Score the candidate actions, best first
    pub fn score_actions(
        &self,
        need: f64,
        safe_to_wait: f64,
        capacity_score: f64,
        placement: CareAction,
    ) -> Vec<Ranked<CareAction>> {
        let c = (capacity_score / 100.0).clamp(0.0, 1.0);
        let u = 1.0 - safe_to_wait;

        let candidates = [
            CareAction::Escalate,
            placement,
            CareAction::Reprioritize,
            CareAction::Observe,
            CareAction::Delay,
        ]
        .into_iter()
        .map(|action| {
            let i = intensity(action);
            let (capacity, impact) = match action {
                CareAction::Escalate => (c, 0.5),
                CareAction::Admit | CareAction::Transfer => (c, c),
                CareAction::Reprioritize => (0.8, 0.6),
                CareAction::Observe => (1.0, 0.5),
                CareAction::Delay => (1.0, 0.3),
            };
            Candidate {
                id: action.as_str().to_string(),
                arrival: action.ordinal(),
                scores: CriterionScores::clamped(
                    1.0 - (i - need).abs(),
                    1.0 - (i - u).abs(),
                    capacity,
                    impact,
                ),
                item: action,
            }
        })
        .collect();

        self.mcda.rank(candidates)
    }

    pub fn decide(&self, input: &DecisionInput<'_>) -> EscalationDecision {
        let need = clinical_need(input.risk);
        let p = safe_to_wait(input.risk.trajectory, input.capacity.capacity_score);
        let placement = match input.location {
            None | Some("ED") => CareAction::Admit,
            Some(_) => CareAction::Transfer,
        };

        let ranked = self.score_actions(need, p, input.capacity.capacity_score, placement);
        let top = &ranked[0];
        let mcda_action = top.candidate.item;

        let override_applied =
            p < self.policy.safe_to_wait_threshold && mcda_action != CareAction::Escalate;
        let (action, breakdown) = if p < self.policy.safe_to_wait_threshold {
            let escalate = ranked
                .iter()
                .find(|r| r.candidate.item == CareAction::Escalate)
                .map_or(top.breakdown, |r| r.breakdown);
            (CareAction::Escalate, escalate)
        } else {
            (mcda_action, top.breakdown)
        };

        let confidence = input
            .risk
            .confidence
            .min(input.capacity.confidence)
            .min(input.flow.confidence);

        let target_unit = match action {
            CareAction::Escalate | CareAction::Admit | CareAction::Transfer => {
                input.flow.target_unit.clone()
            }
            _ => None,
        };

        let (recommended_wait, max_wait) = wait_window(p);
        let reasoning = if override_applied {
            format!(
                "{} overridden: safe-to-wait {:.2} below {:.2} ({} trajectory, risk {:.0})",
                mcda_action,
                p,
                self.policy.safe_to_wait_threshold,
                input.risk.trajectory,
                input.risk.score
            )
        } else {
            format!(
                "{} ranked first at {:.3}; dominant {}; safe-to-wait {:.2}",
                action, breakdown.weighted_total, breakdown.dominant, p
            )
        };

        EscalationDecision {
            decision_id: format!("{}:{}", input.stimulus_id, input.patient_id),
            stimulus_id: input.stimulus_id.to_string(),
            patient_id: input.patient_id.to_string(),
            action,
            target_unit,
            reasoning,
            breakdown,
            confidence,
            alternatives: ranked
                .iter()
                .map(|r| ActionScore {
                    action: r.candidate.item,
                    breakdown: r.breakdown,
                })
                .collect(),
            urgency: UrgencyLevel::from_safe_to_wait(p),
            priority: breakdown.priority_level(),
            uncertainty: UncertaintyMetrics {
                safe_to_wait: p,
                confidence_level: ConfidenceLevel::from_confidence(confidence),
                model_uncertainty: (breakdown.scores.dispersion() / 0.4).min(1.0),
                recommended_wait_minutes: recommended_wait,
                max_safe_wait_minutes: max_wait,
            },
            override_applied,
            requires_review: confidence < self.policy.review_confidence_threshold,
            timestamp: input.now,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::domain::RiskLevel;
    use std::collections::BTreeSet;

    pub fn risk(
        patient: &str,
        score: f64,
        trajectory: Trajectory,
        confidence: f64,
    ) -> RiskAssessment {
        RiskAssessment {
            patient_id: patient.to_string(),
            stimulus_id: String::new(),
            score,
            trajectory,
            confidence,
            contributing_factors: BTreeSet::new(),
            risk_level: RiskLevel::from_score(score),
            vital_points: 0.0,
            deterioration_points: 0.0,
            history_points: 0.0,
            consciousness_points: 0.0,
            escalation_required: false,
            monitoring_interval_minutes: 30,
            samples_used: 1,
            produced_at: Utc::now(),
        }
    }

    pub fn capacity(unit: &str, score: f64, confidence: f64) -> CapacityAssessment {
        CapacityAssessment {
            unit_id: unit.to_string(),
            occupancy_rate: 1.0 - score / 100.0,
            staff_ratio: Some(4.0),
            capacity_score: score,
            available_beds: 2,
            predicted_availability: None,
            bottleneck: None,
            confidence,
            produced_at: Utc::now(),
        }
    }

    pub fn flow(patient: &str, target: Option<&str>, confidence: f64) -> FlowRecommendation {
        FlowRecommendation {
            patient_id: patient.to_string(),
            stimulus_id: String::new(),
            action: CareAction::Observe,
            target_unit: target.map(str::to_string),
            alternatives: Vec::new(),
            breakdown: None,
            confidence,
            produced_at: Utc::now(),
        }
    }
}
