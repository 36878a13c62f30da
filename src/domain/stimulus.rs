use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::hospital::{BedChange, ShiftChange};
use super::patient::VitalsSample;
use crate::bus::{topics, Event};
use crate::error::{CareError, Result};

/// What a stimulus is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Subject {
    Patient(String),
    Unit(String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Patient(id) => write!(f, "patient {id}"),
            Subject::Unit(id) => write!(f, "unit {id}"),
        }
    }
}

/// `patient.arrival` payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientArrival {
    #[serde(default, alias = "initial_location")]
    pub location: Option<String>,
    #[serde(default, alias = "medical_history")]
    pub history_tags: Vec<String>,
    #[serde(default)]
    pub vitals: Option<VitalsSample>,
}

/// External trigger mapped from a bus event
#[derive(Debug, Clone, PartialEq)]
pub enum Stimulus {
    Arrival {
        patient_id: String,
        arrival: PatientArrival,
        at: DateTime<Utc>,
    },
    Vitals {
        patient_id: String,
        sample: VitalsSample,
    },
    Bed(BedChange),
    Shift(ShiftChange),
}

impl Stimulus {
    pub fn from_event(event: &Event) -> Result<Self> {
        let patient_id = || {
            event.patient_id.clone().ok_or_else(|| {
                CareError::InvalidStimulus(format!("{} without patient_id", event.event_type))
            })
        };

        match event.event_type.as_str() {
            topics::PATIENT_ARRIVAL => Ok(Stimulus::Arrival {
                patient_id: patient_id()?,
                arrival: event.payload_as()?,
                at: event.timestamp,
            }),
            topics::VITALS_UPDATE => Ok(Stimulus::Vitals {
                patient_id: patient_id()?,
                sample: event.payload_as()?,
            }),
            topics::BED_CHANGE => Ok(Stimulus::Bed(event.payload_as()?)),
            topics::STAFF_SHIFT => Ok(Stimulus::Shift(event.payload_as()?)),
            other => Err(CareError::InvalidStimulus(format!(
                "{other} is not a stimulus topic"
            ))),
        }
    }

    pub fn subject(&self) -> Subject {
        match self {
            Stimulus::Arrival { patient_id, .. } | Stimulus::Vitals { patient_id, .. } => {
                Subject::Patient(patient_id.clone())
            }
            Stimulus::Bed(change) => Subject::Unit(change.unit_id.clone()),
            Stimulus::Shift(change) => Subject::Unit(change.unit_id.clone()),
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Stimulus::Arrival { .. } => topics::PATIENT_ARRIVAL,
            Stimulus::Vitals { .. } => topics::VITALS_UPDATE,
            Stimulus::Bed(_) => topics::BED_CHANGE,
            Stimulus::Shift(_) => topics::STAFF_SHIFT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BedState;
    use serde_json::json;

    #[test]
    fn test_vitals_event_maps_to_patient_subject() {
        let event = Event::new(
            topics::VITALS_UPDATE,
            "generator",
            Some("p9".into()),
            json!({
                "timestamp": "2026-03-01T08:00:00Z",
                "heart_rate": 88.0,
                "blood_pressure_systolic": 118.0,
                "bp_diastolic": 76.0,
                "oxygen_saturation": 97.0,
                "respiratory_rate": 18.0,
                "temperature": 37.2,
                "glasgow_coma_scale": 15
            }),
        );
        let stimulus = Stimulus::from_event(&event).unwrap();
        assert_eq!(stimulus.subject(), Subject::Patient("p9".into()));
        match stimulus {
            Stimulus::Vitals { sample, .. } => assert_eq!(sample.spo2, 97.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bed_change_maps_to_unit_subject() {
        let event = Event::new(
            topics::BED_CHANGE,
            "generator",
            None,
            json!({"unit_id": "ICU", "from": "occupied", "to": "cleaning"}),
        );
        let stimulus = Stimulus::from_event(&event).unwrap();
        assert_eq!(stimulus.subject(), Subject::Unit("ICU".into()));
        assert!(matches!(stimulus, Stimulus::Bed(BedChange { to: BedState::Cleaning, .. })));
    }

    #[test]
    fn test_rejects_missing_patient_and_unknown_topic() {
        let arrival = Event::new(topics::PATIENT_ARRIVAL, "x", None, json!({}));
        assert!(Stimulus::from_event(&arrival).is_err());

        let other = Event::new(topics::RISK_CALCULATED, "x", Some("p1".into()), json!({}));
        assert!(matches!(
            Stimulus::from_event(&other),
            Err(CareError::InvalidStimulus(_))
        ));
    }
}
