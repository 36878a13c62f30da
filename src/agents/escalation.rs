//! Escalation Decision agent: final action per (stimulus, patient)

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::HospitalConfig;
use crate::domain::{CapacityAssessment, EscalationDecision, FlowRecommendation, RiskAssessment};
use crate::error::{AgentError, StoreError};
use crate::reasoning::{DecisionEngine, DecisionInput};
use crate::store::{StateKey, StateValue};

use super::context::AgentContext;
use super::traits::{Agent, AgentKind};

#[derive(Debug, Clone)]
pub struct EscalationObservation {
    pub stimulus_id: String,
    pub patient_id: String,
    pub location: Option<String>,
    pub risk: RiskAssessment,
    pub flow: FlowRecommendation,
    /// Capacity of the flow target, or the roomiest unit when there is none
    pub capacity: CapacityAssessment,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EscalationAgent {
    hospital: HospitalConfig,
    engine: DecisionEngine,
}

impl EscalationAgent {
    pub fn new(hospital: HospitalConfig, engine: DecisionEngine) -> Self {
        Self { hospital, engine }
    }
}

#[async_trait]
impl Agent for EscalationAgent {
    type Observation = EscalationObservation;
    type Decision = EscalationDecision;

    fn kind(&self) -> AgentKind {
        AgentKind::Escalation
    }

    async fn observe(&self, ctx: &AgentContext) -> Result<EscalationObservation, AgentError> {
        let kind = AgentKind::Escalation;
        let patient_id = ctx.require_patient(kind)?;
        let patient_key = StateKey::Patient(patient_id.to_string());
        let risk_key = StateKey::Risk(patient_id.to_string());
        let flow_key = StateKey::Flow(patient_id.to_string());

        let mut keys = vec![patient_key.clone(), risk_key.clone(), flow_key.clone()];
        keys.extend(self.hospital.units.iter().map(|u| StateKey::Capacity(u.id.clone())));
        let snapshot = ctx.snapshot(&keys).await;

        let missing = |key: &StateKey| AgentError::observation(kind, format!("{key} not found"));
        let wrong = |e: StoreError| AgentError::observation(kind, e.to_string());

        let location = snapshot
            .value(&patient_key)
            .ok_or_else(|| missing(&patient_key))?
            .as_patient(&patient_key)
            .map_err(wrong)?
            .location
            .clone();
        let risk = snapshot
            .value(&risk_key)
            .ok_or_else(|| missing(&risk_key))?
            .as_risk(&risk_key)
            .map_err(wrong)?
            .clone();
        let flow = snapshot
            .value(&flow_key)
            .ok_or_else(|| missing(&flow_key))?
            .as_flow(&flow_key)
            .map_err(wrong)?
            .clone();
        ctx.require_current(kind, &risk_key, &risk.stimulus_id)?;
        ctx.require_current(kind, &flow_key, &flow.stimulus_id)?;

        let mut capacities = Vec::new();
        for (key, versioned) in snapshot.iter() {
            if let StateValue::Capacity(c) = &versioned.value {
                capacities.push(c);
            } else if matches!(key, StateKey::Capacity(_)) {
                return Err(wrong(StoreError::TypeMismatch {
                    key: key.clone(),
                    expected: "Capacity",
                }));
            }
        }
        let capacity = flow
            .target_unit
            .as_deref()
            .and_then(|target| capacities.iter().find(|c| c.unit_id == target))
            .or_else(|| {
                capacities
                    .iter()
                    .max_by(|a, b| a.capacity_score.total_cmp(&b.capacity_score))
            })
            .map(|c| (*c).clone())
            .ok_or_else(|| AgentError::observation(kind, "no capacity assessments"))?;

        Ok(EscalationObservation {
            stimulus_id: ctx.stimulus_id.clone(),
            patient_id: patient_id.to_string(),
            location,
            risk,
            flow,
            capacity,
            now: ctx.now,
        })
    }

    fn decide(&self, obs: EscalationObservation) -> Result<EscalationDecision, AgentError> {
        if obs.risk.patient_id != obs.patient_id || obs.flow.patient_id != obs.patient_id {
            return Err(AgentError::decision(
                AgentKind::Escalation,
                format!("assessments do not belong to patient {}", obs.patient_id),
            ));
        }
        Ok(self.engine.decide(&DecisionInput {
            stimulus_id: &obs.stimulus_id,
            patient_id: &obs.patient_id,
            location: obs.location.as_deref(),
            risk: &obs.risk,
            capacity: &obs.capacity,
            flow: &obs.flow,
            now: obs.now,
        }))
    }

    fn records(&self, decision: &EscalationDecision) -> Vec<(StateKey, StateValue)> {
        vec![(
            StateKey::Decision(decision.patient_id.clone()),
            StateValue::Decision(decision.clone()),
        )]
    }
}
