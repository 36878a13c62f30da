//! Flow Recommendation agent: ranks every unit as a placement via MCDA

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::HospitalConfig;
use crate::domain::{
    CapacityAssessment, CareAction, FlowRecommendation, Patient, PlacementOption, RiskAssessment,
    Trajectory,
};
use crate::error::AgentError;
use crate::reasoning::{clinical_need, Candidate, CriterionScores, McdaEngine};
use crate::store::{StateKey, StateValue};

use super::context::AgentContext;
use super::traits::{Agent, AgentKind};

/// Minutes of predicted wait at which bed urgency halves
const WAIT_HALF_LIFE_MINUTES: f64 = 30.0;

#[derive(Debug, Clone)]
pub struct FlowObservation {
    pub stimulus_id: String,
    pub patient: Patient,
    pub risk: RiskAssessment,
    /// Latest capacity per configured unit, in configured order
    pub capacities: Vec<CapacityAssessment>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FlowAgent {
    hospital: HospitalConfig,
    mcda: McdaEngine,
}

impl FlowAgent {
    pub fn new(hospital: HospitalConfig, mcda: McdaEngine) -> Self {
        Self { hospital, mcda }
    }

    /// 1.0 with a free bed now, decaying with the predicted wait, 0 with no prediction
    fn bed_urgency(capacity: &CapacityAssessment, now: DateTime<Utc>) -> f64 {
        if capacity.has_bed() {
            return 1.0;
        }
        match capacity.predicted_availability {
            Some(at) => {
                let minutes = (at - now).num_seconds().max(0) as f64 / 60.0;
                1.0 / (1.0 + minutes / WAIT_HALF_LIFE_MINUTES)
            }
            None => 0.0,
        }
    }

    fn placements(&self, obs: &FlowObservation) -> Vec<PlacementOption> {
        let need = clinical_need(&obs.risk);
        let candidates = obs
            .capacities
            .iter()
            .filter_map(|capacity| {
                let index = self.hospital.unit_index(&capacity.unit_id)?;
                let care_level = self.hospital.units[index].care_level;
                Some(Candidate {
                    id: capacity.unit_id.clone(),
                    arrival: index as u64,
                    scores: CriterionScores::clamped(
                        1.0 - (care_level - need).abs(),
                        Self::bed_urgency(capacity, obs.now),
                        capacity.capacity_score / 100.0,
                        1.0 - capacity.occupancy_rate,
                    ),
                    item: capacity,
                })
            })
            .collect();

        self.mcda
            .rank(candidates)
            .into_iter()
            .map(|r| PlacementOption {
                unit_id: r.candidate.id,
                available_beds: r.candidate.item.available_beds,
                viable: r.candidate.item.has_bed(),
                breakdown: r.breakdown,
            })
            .collect()
    }
}

#[async_trait]
impl Agent for FlowAgent {
    type Observation = FlowObservation;
    type Decision = FlowRecommendation;

    fn kind(&self) -> AgentKind {
        AgentKind::Flow
    }

    async fn observe(&self, ctx: &AgentContext) -> Result<FlowObservation, AgentError> {
        let kind = AgentKind::Flow;
        let patient_id = ctx.require_patient(kind)?;
        let patient_key = StateKey::Patient(patient_id.to_string());
        let risk_key = StateKey::Risk(patient_id.to_string());
        let capacity_keys: Vec<StateKey> = self
            .hospital
            .units
            .iter()
            .map(|u| StateKey::Capacity(u.id.clone()))
            .collect();

        let mut keys = vec![patient_key.clone(), risk_key.clone()];
        keys.extend(capacity_keys.iter().cloned());
        // One consistent read across risk and capacity
        let snapshot = ctx.snapshot(&keys).await;

        let missing = |key: &StateKey| AgentError::observation(kind, format!("{key} not found"));
        let wrong = |e: crate::error::StoreError| AgentError::observation(kind, e.to_string());

        let patient = snapshot
            .value(&patient_key)
            .ok_or_else(|| missing(&patient_key))?
            .as_patient(&patient_key)
            .map_err(wrong)?
            .clone();
        let risk = snapshot
            .value(&risk_key)
            .ok_or_else(|| missing(&risk_key))?
            .as_risk(&risk_key)
            .map_err(wrong)?
            .clone();
        ctx.require_current(kind, &risk_key, &risk.stimulus_id)?;

        let mut capacities = Vec::with_capacity(capacity_keys.len());
        for key in &capacity_keys {
            if let Some(value) = snapshot.value(key) {
                capacities.push(value.as_capacity(key).map_err(wrong)?.clone());
            }
        }
        if capacities.is_empty() {
            return Err(AgentError::observation(kind, "no capacity assessments"));
        }

        Ok(FlowObservation {
            stimulus_id: ctx.stimulus_id.clone(),
            patient,
            risk,
            capacities,
            now: ctx.now,
        })
    }

    fn decide(&self, obs: FlowObservation) -> Result<FlowRecommendation, AgentError> {
        let placements = self.placements(&obs);
        if placements.is_empty() {
            return Err(AgentError::decision(
                AgentKind::Flow,
                "no assessed unit is configured",
            ));
        }

        let location = obs.patient.location.as_deref();
        let best_viable = placements.iter().find(|p| p.viable);

        let (action, target) = if obs.risk.trajectory == Trajectory::Critical {
            let target = best_viable.unwrap_or(&placements[0]);
            (CareAction::Escalate, Some(target))
        } else {
            match best_viable {
                Some(p) if Some(p.unit_id.as_str()) == location => (CareAction::Observe, Some(p)),
                Some(p) if matches!(location, None | Some("ED")) => (CareAction::Admit, Some(p)),
                Some(p) => (CareAction::Transfer, Some(p)),
                None => (CareAction::Observe, None),
            }
        };

        let confidence = obs
            .capacities
            .iter()
            .map(|c| c.confidence)
            .fold(obs.risk.confidence, f64::min);

        Ok(FlowRecommendation {
            patient_id: obs.patient.id.clone(),
            stimulus_id: obs.stimulus_id.clone(),
            action,
            target_unit: target.map(|p| p.unit_id.clone()),
            breakdown: Some(target.unwrap_or(&placements[0]).breakdown),
            alternatives: placements,
            confidence,
            produced_at: obs.now,
        })
    }

    fn records(&self, decision: &FlowRecommendation) -> Vec<(StateKey, StateValue)> {
        vec![(
            StateKey::Flow(decision.patient_id.clone()),
            StateValue::Flow(decision.clone()),
        )]
    }
}
