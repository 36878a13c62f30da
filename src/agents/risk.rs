//! Risk Assessment agent
//!
//! NEWS2-style early-warning score built from four parts:
//! - vital-sign points (0-40) from banded SpO2, HR, systolic BP, RR and temperature
//! - deterioration points (0-30) from per-vital trends against the previous sample
//! - history points (0-15) from history tags, weighted for high-risk conditions
//! - consciousness points (0-15) from the Glasgow coma scale
//!
//! The previous stored assessment supplies the score delta used for the
//! trajectory, so a patient's risk reads as a trend rather than a snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::config::DecisionConfig;
use crate::domain::{Patient, RiskAssessment, RiskLevel, Trajectory, VitalsSample};
use crate::error::AgentError;
use crate::store::{StateKey, StateValue};

use super::context::AgentContext;
use super::traits::{Agent, AgentKind};

const HIGH_RISK_CONDITIONS: [&str; 6] =
    ["CAD", "CHF", "COPD", "CKD", "Previous MI", "Stroke history"];

const MAX_VITAL_POINTS: f64 = 40.0;
const MAX_DETERIORATION_POINTS: f64 = 30.0;
const MAX_HISTORY_POINTS: f64 = 15.0;

/// Per-vital direction of change between the two latest samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Improving,
    Stable,
    Deteriorating,
    Rapid,
}

#[derive(Debug, Clone, Copy)]
struct VitalTrend {
    vital: &'static str,
    direction: Direction,
    critical: bool,
    out_of_range: bool,
}

impl VitalTrend {
    fn level(vital: &'static str, critical: bool, out_of_range: bool) -> Self {
        Self {
            vital,
            direction: Direction::Stable,
            critical,
            out_of_range,
        }
    }

    fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    fn is_deteriorating(&self) -> bool {
        matches!(self.direction, Direction::Deteriorating | Direction::Rapid)
    }
}

// ==================== Vital bands ====================

fn spo2_band(spo2: f64) -> f64 {
    match spo2 {
        s if s >= 96.0 => 0.0,
        s if s >= 94.0 => 1.0,
        s if s >= 92.0 => 2.0,
        s if s >= 90.0 => 3.0,
        s if s >= 88.0 => 6.0,
        s if s >= 85.0 => 9.0,
        _ => 12.0,
    }
}

fn heart_rate_band(hr: f64) -> f64 {
    let hr = hr.round();
    match hr {
        h if (51.0..=90.0).contains(&h) => 0.0,
        h if (41.0..=50.0).contains(&h) || (91.0..=110.0).contains(&h) => 1.0,
        h if (111.0..=130.0).contains(&h) => 2.0,
        h if h <= 40.0 || (131.0..=150.0).contains(&h) => 6.0,
        _ => 12.0,
    }
}

fn systolic_band(sbp: f64) -> f64 {
    let sbp = sbp.round();
    match sbp {
        s if (111.0..=219.0).contains(&s) => 0.0,
        s if (101.0..=110.0).contains(&s) => 1.0,
        s if (91.0..=100.0).contains(&s) => 2.0,
        s if (81.0..=90.0).contains(&s) => 6.0,
        _ => 12.0,
    }
}

fn respiratory_band(rr: f64) -> f64 {
    let rr = rr.round();
    match rr {
        r if (12.0..=20.0).contains(&r) => 0.0,
        r if (9.0..=11.0).contains(&r) || (21.0..=24.0).contains(&r) => 1.0,
        r if r <= 8.0 || (25.0..=29.0).contains(&r) => 2.0,
        r if (30.0..=35.0).contains(&r) => 6.0,
        _ => 12.0,
    }
}

fn temperature_band(temp: f64) -> f64 {
    let temp = (temp * 10.0).round() / 10.0;
    match temp {
        t if (36.1..=38.0).contains(&t) => 0.0,
        t if (35.1..=36.0).contains(&t) || (38.1..=39.0).contains(&t) => 1.0,
        t if (39.1..=40.0).contains(&t) => 2.0,
        _ => 6.0,
    }
}

/// Weighted band points scaled onto 0..=40
fn vital_points(sample: &VitalsSample) -> f64 {
    let weighted = spo2_band(sample.spo2) * 3.0
        + heart_rate_band(sample.heart_rate) * 2.5
        + systolic_band(sample.bp_systolic) * 2.5
        + respiratory_band(sample.respiratory_rate) * 2.0
        + temperature_band(sample.temperature) * 1.5;
    (weighted / 12.0 * 3.33).min(MAX_VITAL_POINTS)
}

// ==================== Trends ====================

/// Range flags always apply; direction needs a previous sample.
fn vital_trends(current: &VitalsSample, previous: Option<&VitalsSample>) -> Vec<VitalTrend> {
    let spo2 = current.spo2;
    let hr = current.heart_rate;
    let rr = current.respiratory_rate;
    let sbp = current.bp_systolic;
    let temp = current.temperature;

    let mut trends = vec![
        VitalTrend::level("spo2", spo2 < 88.0, spo2 < 92.0),
        VitalTrend::level(
            "heart_rate",
            !(40.0..=150.0).contains(&hr),
            !(50.0..=120.0).contains(&hr),
        ),
        VitalTrend::level(
            "respiratory_rate",
            !(8.0..=35.0).contains(&rr),
            !(10.0..=25.0).contains(&rr),
        ),
        VitalTrend::level(
            "systolic_bp",
            !(80.0..=200.0).contains(&sbp),
            !(90.0..=180.0).contains(&sbp),
        ),
        VitalTrend::level(
            "temperature",
            !(35.0..=40.0).contains(&temp),
            !(36.0..=38.5).contains(&temp),
        ),
    ];

    let Some(prev) = previous else {
        return trends;
    };

    let directions = [
        spo2_direction(spo2 - prev.spo2),
        two_sided_direction(
            (hr - prev.heart_rate).abs(),
            [20.0, 10.0, 5.0],
            (60.0..=100.0).contains(&hr),
        ),
        two_sided_direction(
            (rr - prev.respiratory_rate).abs(),
            [8.0, 4.0, 2.0],
            (12.0..=20.0).contains(&rr),
        ),
        systolic_direction(sbp - prev.bp_systolic, sbp),
        temperature_direction(temp - prev.temperature, temp),
    ];
    for (trend, direction) in trends.iter_mut().zip(directions) {
        *trend = trend.with_direction(direction);
    }
    trends
}

fn spo2_direction(change: f64) -> Direction {
    if change < -3.0 {
        Direction::Rapid
    } else if change < -1.0 {
        Direction::Deteriorating
    } else if change > 2.0 {
        Direction::Improving
    } else {
        Direction::Stable
    }
}

/// Heart and respiratory rate: any large swing is bad. `bands` holds the
/// rapid, worsening and steady limits on the absolute change.
fn two_sided_direction(abs_change: f64, bands: [f64; 3], in_normal_range: bool) -> Direction {
    let [rapid, worse, steady] = bands;
    if abs_change > rapid {
        Direction::Rapid
    } else if abs_change > worse {
        Direction::Deteriorating
    } else if abs_change < steady && in_normal_range {
        Direction::Improving
    } else {
        Direction::Stable
    }
}

fn systolic_direction(change: f64, current: f64) -> Direction {
    if change < -15.0 {
        Direction::Rapid
    } else if change < -10.0 {
        Direction::Deteriorating
    } else if change > 10.0 && current < 140.0 {
        Direction::Improving
    } else {
        Direction::Stable
    }
}

fn temperature_direction(change: f64, current: f64) -> Direction {
    if change > 1.0 {
        Direction::Rapid
    } else if change.abs() > 0.5 {
        if current > 37.5 {
            Direction::Deteriorating
        } else {
            Direction::Stable
        }
    } else if (36.5..=37.5).contains(&current) {
        Direction::Improving
    } else {
        Direction::Stable
    }
}

fn deterioration_points(trends: &[VitalTrend]) -> f64 {
    let score: f64 = trends
        .iter()
        .map(|t| {
            let level = if t.critical {
                10.0
            } else if t.out_of_range {
                5.0
            } else {
                0.0
            };
            let direction = match t.direction {
                Direction::Rapid => 8.0,
                Direction::Deteriorating => 4.0,
                Direction::Improving => -2.0,
                Direction::Stable => 0.0,
            };
            level + direction
        })
        .sum();
    score.clamp(0.0, MAX_DETERIORATION_POINTS)
}

fn history_points(tags: &[String]) -> f64 {
    let base = (tags.len() as f64 * 2.0).min(10.0);
    let high_risk = tags
        .iter()
        .filter(|t| HIGH_RISK_CONDITIONS.contains(&t.as_str()))
        .count() as f64;
    (base + high_risk).min(MAX_HISTORY_POINTS)
}

fn consciousness_points(gcs: u8) -> f64 {
    match gcs {
        15 => 0.0,
        13..=14 => 4.0,
        9..=12 => 8.0,
        6..=8 => 12.0,
        _ => 15.0,
    }
}

/// Fewer samples, less confidence
fn sample_confidence(samples: usize) -> f64 {
    (0.5 + 0.15 * samples.saturating_sub(1) as f64).min(0.95)
}

fn monitoring_interval(level: RiskLevel, trajectory: Trajectory) -> u32 {
    match (level, trajectory) {
        (RiskLevel::Critical, _) | (_, Trajectory::Critical) => 5,
        (RiskLevel::High, _) | (_, Trajectory::Deteriorating) => 10,
        (RiskLevel::Moderate, _) => 15,
        _ => 30,
    }
}

// ==================== Agent ====================

/// What the Risk agent reads for one patient
#[derive(Debug, Clone)]
pub struct RiskObservation {
    pub stimulus_id: String,
    pub patient: Patient,
    /// Score of the assessment this one supersedes
    pub previous_score: Option<f64>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RiskAgent {
    critical_risk_threshold: f64,
}

impl RiskAgent {
    pub fn new(policy: &DecisionConfig) -> Self {
        Self {
            critical_risk_threshold: policy.critical_risk_threshold,
        }
    }
}

impl Default for RiskAgent {
    fn default() -> Self {
        Self::new(&DecisionConfig::default())
    }
}

#[async_trait]
impl Agent for RiskAgent {
    type Observation = RiskObservation;
    type Decision = RiskAssessment;

    fn kind(&self) -> AgentKind {
        AgentKind::Risk
    }

    async fn observe(&self, ctx: &AgentContext) -> Result<RiskObservation, AgentError> {
        let kind = AgentKind::Risk;
        let patient_id = ctx.require_patient(kind)?;
        let patient_key = StateKey::Patient(patient_id.to_string());
        let risk_key = StateKey::Risk(patient_id.to_string());
        let snapshot = ctx.snapshot(&[patient_key.clone(), risk_key.clone()]).await;

        let patient = snapshot
            .value(&patient_key)
            .ok_or_else(|| AgentError::observation(kind, format!("{patient_key} not found")))?
            .as_patient(&patient_key)
            .map_err(|e| AgentError::observation(kind, e.to_string()))?
            .clone();

        let previous_score = match snapshot.value(&risk_key) {
            Some(value) => Some(
                value
                    .as_risk(&risk_key)
                    .map_err(|e| AgentError::observation(kind, e.to_string()))?
                    .score,
            ),
            None => None,
        };

        Ok(RiskObservation {
            stimulus_id: ctx.stimulus_id.clone(),
            patient,
            previous_score,
            now: ctx.now,
        })
    }

    fn decide(&self, obs: RiskObservation) -> Result<RiskAssessment, AgentError> {
        let patient = &obs.patient;
        let current = patient.latest_vitals().ok_or_else(|| {
            AgentError::decision(AgentKind::Risk, format!("patient {} has no vitals", patient.id))
        })?;
        current
            .validate()
            .map_err(|e| AgentError::decision(AgentKind::Risk, e.to_string()))?;

        let trends = vital_trends(current, patient.previous_vitals());
        let vital = vital_points(current);
        let deterioration = deterioration_points(&trends);
        let history = history_points(&patient.history_tags);
        let consciousness = consciousness_points(current.consciousness);
        let score = (vital + deterioration + history + consciousness).clamp(0.0, 100.0);
        let delta = obs.previous_score.map_or(0.0, |prev| score - prev);

        let rapid = trends.iter().any(|t| t.direction == Direction::Rapid);
        let deteriorating = trends.iter().filter(|t| t.is_deteriorating()).count();
        let improving = trends
            .iter()
            .filter(|t| t.direction == Direction::Improving)
            .count();

        let trajectory = if rapid || deteriorating >= 3 || score >= self.critical_risk_threshold {
            Trajectory::Critical
        } else if deteriorating >= 2 || delta > 10.0 {
            Trajectory::Deteriorating
        } else if improving >= 3 || delta < -10.0 {
            Trajectory::Improving
        } else {
            Trajectory::Stable
        };

        let critical_vitals = trends.iter().filter(|t| t.critical).count();
        let escalation_required = score >= self.critical_risk_threshold
            || rapid
            || critical_vitals >= 2
            || (critical_vitals >= 1 && trajectory == Trajectory::Deteriorating);

        let mut factors = BTreeSet::new();
        for t in &trends {
            if t.critical {
                factors.insert(format!("{} critical", t.vital));
            } else if t.out_of_range {
                factors.insert(format!("{} out of range", t.vital));
            }
            match t.direction {
                Direction::Rapid => {
                    factors.insert(format!("{} rapidly deteriorating", t.vital));
                }
                Direction::Deteriorating => {
                    factors.insert(format!("{} deteriorating", t.vital));
                }
                _ => {}
            }
        }
        for tag in &patient.history_tags {
            if HIGH_RISK_CONDITIONS.contains(&tag.as_str()) {
                factors.insert(format!("history: {tag}"));
            }
        }
        if consciousness > 0.0 {
            factors.insert(format!("reduced consciousness (GCS {})", current.consciousness));
        }

        let risk_level = RiskLevel::from_score(score);
        Ok(RiskAssessment {
            patient_id: patient.id.clone(),
            stimulus_id: obs.stimulus_id.clone(),
            score,
            trajectory,
            confidence: sample_confidence(patient.vitals.len()),
            contributing_factors: factors,
            risk_level,
            vital_points: vital,
            deterioration_points: deterioration,
            history_points: history,
            consciousness_points: consciousness,
            escalation_required,
            monitoring_interval_minutes: monitoring_interval(risk_level, trajectory),
            samples_used: patient.vitals.len().min(2),
            produced_at: obs.now,
        })
    }

    fn records(&self, decision: &RiskAssessment) -> Vec<(StateKey, StateValue)> {
        vec![(
            StateKey::Risk(decision.patient_id.clone()),
            StateValue::Risk(decision.clone()),
        )]
    }
}
