//! Capacity Assessment agent
//!
//! Scores each unit's census: half the score is free beds, half is staffing
//! adequacy against the target patients-per-staff ratio.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::HospitalConfig;
use crate::domain::{CapacityAssessment, UnitCensus};
use crate::error::AgentError;
use crate::store::{StateKey, StateValue};

use super::context::AgentContext;
use super::traits::{Agent, AgentKind};

const FRESH_CONFIDENCE: f64 = 0.85;
const STALE_CONFIDENCE: f64 = 0.5;
const MAX_ADEQUACY: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct CapacityObservation {
    /// Censuses in configured unit order
    pub censuses: Vec<UnitCensus>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CapacityAgent {
    hospital: HospitalConfig,
}

impl CapacityAgent {
    pub fn new(hospital: HospitalConfig) -> Self {
        Self { hospital }
    }

    /// Staff adequacy, 1.0 meaning exactly on target
    fn adequacy(&self, census: &UnitCensus) -> f64 {
        if census.occupied == 0 {
            return MAX_ADEQUACY;
        }
        if census.staff_on_duty == 0 {
            return 0.0;
        }
        let ratio = f64::from(census.occupied) / f64::from(census.staff_on_duty);
        self.hospital.target_patients_per_staff / ratio
    }

    fn confidence(&self, census: &UnitCensus, now: DateTime<Utc>) -> f64 {
        let stale_after = self.hospital.census_stale_after_secs.max(1) as f64;
        let age = (now - census.updated_at).num_seconds().max(0) as f64;
        if age <= stale_after {
            return FRESH_CONFIDENCE;
        }
        let decay = ((age - stale_after) / stale_after).min(1.0);
        FRESH_CONFIDENCE - (FRESH_CONFIDENCE - STALE_CONFIDENCE) * decay
    }

    pub fn assess(&self, census: &UnitCensus, now: DateTime<Utc>) -> CapacityAssessment {
        let occupancy = census.occupancy_rate();
        let adequacy = self.adequacy(census);
        let score = 50.0 * (1.0 - occupancy) + 50.0 * adequacy.min(MAX_ADEQUACY) / MAX_ADEQUACY;

        let bottleneck = if occupancy > 0.9 {
            Some("high occupancy".to_string())
        } else if adequacy < 0.7 {
            Some("staff shortage".to_string())
        } else {
            None
        };

        CapacityAssessment {
            unit_id: census.unit_id.clone(),
            occupancy_rate: occupancy,
            staff_ratio: (census.staff_on_duty > 0)
                .then(|| f64::from(census.occupied) / f64::from(census.staff_on_duty)),
            capacity_score: score.clamp(0.0, 100.0),
            available_beds: census.available,
            predicted_availability: if census.available == 0 {
                census.earliest_release()
            } else {
                None
            },
            bottleneck,
            confidence: self.confidence(census, now),
            produced_at: now,
        }
    }
}

#[async_trait]
impl Agent for CapacityAgent {
    type Observation = CapacityObservation;
    type Decision = Vec<CapacityAssessment>;

    fn kind(&self) -> AgentKind {
        AgentKind::Capacity
    }

    async fn observe(&self, ctx: &AgentContext) -> Result<CapacityObservation, AgentError> {
        let kind = AgentKind::Capacity;
        let keys: Vec<StateKey> = match &ctx.unit_id {
            Some(unit) => vec![StateKey::Census(unit.clone())],
            None => self
                .hospital
                .units
                .iter()
                .map(|u| StateKey::Census(u.id.clone()))
                .collect(),
        };
        let snapshot = ctx.snapshot(&keys).await;

        let mut censuses = Vec::with_capacity(keys.len());
        for key in &keys {
            let census = snapshot
                .value(key)
                .ok_or_else(|| AgentError::observation(kind, format!("{key} not found")))?
                .as_census(key)
                .map_err(|e| AgentError::observation(kind, e.to_string()))?;
            censuses.push(census.clone());
        }

        Ok(CapacityObservation {
            censuses,
            now: ctx.now,
        })
    }

    fn decide(&self, obs: CapacityObservation) -> Result<Vec<CapacityAssessment>, AgentError> {
        if obs.censuses.is_empty() {
            return Err(AgentError::decision(AgentKind::Capacity, "no units to assess"));
        }
        Ok(obs.censuses.iter().map(|c| self.assess(c, obs.now)).collect())
    }

    fn records(&self, decision: &Vec<CapacityAssessment>) -> Vec<(StateKey, StateValue)> {
        decision
            .iter()
            .map(|c| (StateKey::Capacity(c.unit_id.clone()), StateValue::Capacity(c.clone())))
            .collect()
    }
}
